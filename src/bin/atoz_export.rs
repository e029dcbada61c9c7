use canvass_scraper_lib::driver::{By, PageDriver};
use canvass_scraper_lib::page_loop::{run_export_loop, LoopConfig, PageLoop, PageMode};
use canvass_scraper_lib::webdriver::WebDriverSession;
use canvass_scraper_lib::{delay, logger};

use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use log::{info, warn};

const LOGIN_URL: &str =
    "https://www.library.torranceca.gov/resources/online-resources/business-reference";
const LOGIN_WAIT_SECS: u64 = 45;
const MAX_PAGES: u32 = 10_000_000;
const EXPORT_DIR: &str = "atoz_exports";

const RECORDS_PER_PAGE: &str = "100";
const RECORD_FILTER: By = By::Id("recordFilter");

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    info!("Starting full-detail page export...");
    fs::create_dir_all(EXPORT_DIR)?;

    let server_url =
        env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".to_string());
    let mut driver = WebDriverSession::connect(&server_url)?;

    info!("Opening login page...");
    driver.navigate(LOGIN_URL)?;
    delay::login_window(LOGIN_WAIT_SECS);

    // 100 records per page keeps the page count manageable.
    match driver
        .wait_visible(&RECORD_FILTER, Duration::from_secs(5))
        .and_then(|_| driver.fill(&RECORD_FILTER, RECORDS_PER_PAGE))
    {
        Ok(()) => {
            delay::settle(500);
            info!("Records per page set to {}", RECORDS_PER_PAGE);
        }
        Err(e) => warn!("Could not set records per page: {}", e),
    }

    let config = LoopConfig {
        overlay_timeout: Duration::from_secs(30),
        debug_dir: PathBuf::from(EXPORT_DIR),
        ..LoopConfig::default()
    };
    let mut page_loop = PageLoop::new(driver, PageMode::ExportDialog, config);

    let exported = run_export_loop(&mut page_loop, 1, MAX_PAGES);
    info!("Done. {} pages exported.", exported);
    page_loop.into_driver().quit();
    Ok(())
}
