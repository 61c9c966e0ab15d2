//! Styling for progress and summary output
//!
//! Styling is only ever applied to the stderr reporting stream; the diff
//! stream on stdout must stay byte-exact for `patch`.

#[derive(Copy, Clone, Debug, Default)]
pub struct Palette {
    info: anstyle::Style,
    warn: anstyle::Style,
    error: anstyle::Style,
    hint: anstyle::Style,
}

impl Palette {
    pub fn always() -> Self {
        if cfg!(feature = "color") {
            Self {
                info: anstyle::Style::new().fg_color(Some(anstyle::AnsiColor::Green.into())),
                warn: anstyle::Style::new().fg_color(Some(anstyle::AnsiColor::Yellow.into())),
                error: anstyle::Style::new().fg_color(Some(anstyle::AnsiColor::Red.into())),
                hint: anstyle::Effects::DIMMED.into(),
            }
        } else {
            Self::never()
        }
    }

    pub fn never() -> Self {
        Self::default()
    }

    pub fn auto() -> Self {
        if is_colored() {
            Self::always()
        } else {
            Self::never()
        }
    }

    pub fn info<D: std::fmt::Display>(self, item: D) -> Styled<D> {
        Styled::new(item, self.info)
    }

    pub fn warn<D: std::fmt::Display>(self, item: D) -> Styled<D> {
        Styled::new(item, self.warn)
    }

    pub fn error<D: std::fmt::Display>(self, item: D) -> Styled<D> {
        Styled::new(item, self.error)
    }

    pub fn hint<D: std::fmt::Display>(self, item: D) -> Styled<D> {
        Styled::new(item, self.hint)
    }
}

fn is_colored() -> bool {
    #[cfg(feature = "color")]
    {
        anstream::AutoStream::choice(&std::io::stderr()) != anstream::ColorChoice::Never
    }
    #[cfg(not(feature = "color"))]
    {
        false
    }
}

#[derive(Debug)]
pub struct Styled<D> {
    display: D,
    style: anstyle::Style,
}

impl<D: std::fmt::Display> Styled<D> {
    pub(crate) fn new(display: D, style: anstyle::Style) -> Self {
        Self { display, style }
    }
}

impl<D: std::fmt::Display> std::fmt::Display for Styled<D> {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.style.render())?;
        self.display.fmt(f)?;
        write!(f, "{}", self.style.render_reset())?;
        Ok(())
    }
}
