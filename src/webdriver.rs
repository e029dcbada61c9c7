use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use log::info;

use crate::driver::{By, DriverError, PageDriver};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ENTER_KEY: &str = "\u{E007}";

/// W3C WebDriver session against a local driver server (chromedriver,
/// geckodriver). Speaks the JSON wire protocol directly over the blocking
/// HTTP client; waits are bounded polling loops.
pub struct WebDriverSession {
    http: Client,
    base: String,
    session_id: String,
    pub poll_interval: Duration,
}

fn css_of(locator: &By) -> String {
    match locator {
        By::Id(s) => format!("#{}", s),
        By::Name(s) => format!("[name='{}']", s),
        By::Css(s) => (*s).to_string(),
        By::ClassName(s) => format!(".{}", s),
    }
}

fn backend(e: reqwest::Error) -> DriverError {
    DriverError::Backend(e.to_string())
}

impl WebDriverSession {
    /// Opens a new browser session on the given driver server URL.
    pub fn connect(server_url: &str) -> Result<Self, DriverError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(backend)?;
        let body = json!({ "capabilities": { "alwaysMatch": {} } });
        let value: Value = http
            .post(format!("{}/session", server_url))
            .json(&body)
            .send()
            .map_err(backend)?
            .json()
            .map_err(backend)?;
        let session_id = value["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Backend(format!("no session in response: {}", value)))?
            .to_string();
        info!("WebDriver session {} started.", session_id);
        Ok(WebDriverSession {
            http,
            base: server_url.to_string(),
            session_id,
            poll_interval: Duration::from_millis(500),
        })
    }

    pub fn quit(self) {
        let url = format!("{}/session/{}", self.base, self.session_id);
        let _ = self.http.delete(url).send();
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.base, self.session_id, path)
    }

    fn command(&self, path: &str, body: &Value) -> Result<Value, DriverError> {
        let value: Value = self
            .http
            .post(self.session_url(path))
            .json(body)
            .send()
            .map_err(backend)?
            .json()
            .map_err(backend)?;
        if let Some(error) = value["value"]["error"].as_str() {
            let message = value["value"]["message"].as_str().unwrap_or("").to_string();
            return Err(match error {
                "no such element" => DriverError::NotFound(message),
                _ => DriverError::Backend(format!("{}: {}", error, message)),
            });
        }
        Ok(value)
    }

    fn query(&self, path: &str) -> Result<Value, DriverError> {
        self.http
            .get(self.session_url(path))
            .send()
            .map_err(backend)?
            .json()
            .map_err(backend)
    }

    fn find_elements(&self, locator: &By) -> Result<Vec<String>, DriverError> {
        let body = json!({ "using": "css selector", "value": css_of(locator) });
        let value = self.command("elements", &body)?;
        let ids = value["value"]
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|e| e[ELEMENT_KEY].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    fn find_element(&self, locator: &By) -> Result<String, DriverError> {
        self.find_elements(locator)?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NotFound(locator.to_string()))
    }

    fn any_displayed(&self, locator: &By) -> Result<bool, DriverError> {
        for element in self.find_elements(locator)? {
            let value = self.query(&format!("element/{}/displayed", element))?;
            if value["value"].as_bool().unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl PageDriver for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.command("url", &json!({ "url": url })).map(|_| ())
    }

    fn title(&mut self) -> Result<String, DriverError> {
        Ok(self.query("title")?["value"].as_str().unwrap_or_default().to_string())
    }

    fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.query("url")?["value"].as_str().unwrap_or_default().to_string())
    }

    fn refresh(&mut self) -> Result<(), DriverError> {
        self.command("refresh", &json!({})).map(|_| ())
    }

    fn count(&mut self, locator: &By) -> Result<usize, DriverError> {
        Ok(self.find_elements(locator)?.len())
    }

    fn click(&mut self, locator: &By) -> Result<(), DriverError> {
        let element = self.find_element(locator)?;
        self.command(&format!("element/{}/click", element), &json!({}))
            .map(|_| ())
    }

    fn fill(&mut self, locator: &By, text: &str) -> Result<(), DriverError> {
        let element = self.find_element(locator)?;
        self.command(&format!("element/{}/clear", element), &json!({}))?;
        self.command(&format!("element/{}/value", element), &json!({ "text": text }))
            .map(|_| ())
    }

    fn press_enter(&mut self, locator: &By) -> Result<(), DriverError> {
        let element = self.find_element(locator)?;
        self.command(
            &format!("element/{}/value", element),
            &json!({ "text": ENTER_KEY }),
        )
        .map(|_| ())
    }

    fn attribute(&mut self, locator: &By, name: &str) -> Result<Option<String>, DriverError> {
        let element = self.find_element(locator)?;
        let value = self.query(&format!("element/{}/attribute/{}", element, name))?;
        Ok(value["value"].as_str().map(str::to_string))
    }

    fn wait_visible(&mut self, locator: &By, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.any_displayed(locator).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(locator.to_string()));
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn wait_gone(&mut self, locator: &By, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.any_displayed(locator) {
                Ok(false) => return Ok(()),
                Ok(true) => {}
                // A stale or missing element counts as gone.
                Err(DriverError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(locator.to_string()));
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn page_source(&mut self) -> Result<String, DriverError> {
        Ok(self.query("source")?["value"].as_str().unwrap_or_default().to_string())
    }

    fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
        let value = self.query("screenshot")?;
        let encoded = value["value"].as_str().unwrap_or_default();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Backend(format!("bad screenshot payload: {}", e)))?;
        std::fs::write(path, bytes).map_err(|e| DriverError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_render_as_css() {
        assert_eq!(css_of(&By::Id("checkall")), "#checkall");
        assert_eq!(css_of(&By::Name("paginationuppertextbox")), "[name='paginationuppertextbox']");
        assert_eq!(css_of(&By::ClassName("ui-widget-overlay")), ".ui-widget-overlay");
        assert_eq!(css_of(&By::Css("tr.search-result-stripe1 td")), "tr.search-result-stripe1 td");
    }
}
