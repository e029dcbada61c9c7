use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Element locator, mirroring the control surface the directory site is
/// driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum By {
    Id(&'static str),
    Name(&'static str),
    Css(&'static str),
    ClassName(&'static str),
}

impl fmt::Display for By {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            By::Id(s) => write!(f, "#{}", s),
            By::Name(s) => write!(f, "[name='{}']", s),
            By::Css(s) => write!(f, "{}", s),
            By::ClassName(s) => write!(f, ".{}", s),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("timed out waiting on {0}")]
    Timeout(String),
    #[error("browser backend failure: {0}")]
    Backend(String),
}

/// The browser-control surface the page loop is written against. The real
/// implementation wraps a third-party browser-automation driver and is an
/// external collaborator; tests substitute a scripted double.
///
/// All waiting is blocking with a bounded timeout. There is no cancellation
/// beyond process termination.
pub trait PageDriver {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError>;
    fn title(&mut self) -> Result<String, DriverError>;
    fn current_url(&mut self) -> Result<String, DriverError>;
    fn refresh(&mut self) -> Result<(), DriverError>;

    /// Number of elements currently matching the locator (0 is not an error).
    fn count(&mut self, locator: &By) -> Result<usize, DriverError>;
    fn click(&mut self, locator: &By) -> Result<(), DriverError>;
    /// Clears the element and types the text into it.
    fn fill(&mut self, locator: &By, text: &str) -> Result<(), DriverError>;
    fn press_enter(&mut self, locator: &By) -> Result<(), DriverError>;
    fn attribute(&mut self, locator: &By, name: &str) -> Result<Option<String>, DriverError>;

    /// Blocks until the element is present and visible, or times out.
    fn wait_visible(&mut self, locator: &By, timeout: Duration) -> Result<(), DriverError>;
    /// Blocks until no visible element matches, or times out.
    fn wait_gone(&mut self, locator: &By, timeout: Duration) -> Result<(), DriverError>;

    fn page_source(&mut self) -> Result<String, DriverError>;
    fn screenshot(&mut self, path: &Path) -> Result<(), DriverError>;
}
