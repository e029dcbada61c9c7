use canvass_scraper_lib::checkpoint::Checkpoint;
use canvass_scraper_lib::driver::PageDriver;
use canvass_scraper_lib::page_loop::{run_scrape_loop, LoopConfig, PageLoop, PageMode};
use canvass_scraper_lib::records::CsvSink;
use canvass_scraper_lib::webdriver::WebDriverSession;
use canvass_scraper_lib::{delay, logger};

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use log::{info, error};

const LOGIN_URL: &str =
    "https://www.atozdatabases.com/librarysignin?fromHttps=DB5B7CAF9B83E3399D181683DA41C1B7";
const LOGIN_WAIT_SECS: u64 = 45;
const MAX_PAGES: u32 = 2305;

const OUTPUT_FILE: &str = "torrance_residents_data.csv";
const PROGRESS_FILE: &str = "torrance_residents_progress.txt";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    info!("Starting resident directory scrape...");

    let server_url =
        env::var("WEBDRIVER_URL").unwrap_or_else(|_| "http://localhost:9515".to_string());
    let mut driver = WebDriverSession::connect(&server_url)?;

    info!("Opening login page: {}", LOGIN_URL);
    driver.navigate(LOGIN_URL)?;
    info!("Please log in manually if prompted. You have {} seconds...", LOGIN_WAIT_SECS);
    delay::login_window(LOGIN_WAIT_SECS);

    info!("Page title: {}", driver.title()?);
    info!("URL: {}", driver.current_url()?);

    let checkpoint = Checkpoint::new(PROGRESS_FILE);
    let start_page = checkpoint.read();
    let mut sink = CsvSink::append(OUTPUT_FILE)?;

    let mut page_loop = PageLoop::new(
        driver,
        PageMode::ScrapeRows,
        LoopConfig { debug_dir: PathBuf::from("."), ..LoopConfig::default() },
    );

    if start_page > 1 {
        if let Err(e) = page_loop.resume_to_page(start_page) {
            error!("Failed to resume at page {}: {}", start_page, e);
            page_loop.into_driver().quit();
            process::exit(1);
        }
    }

    match run_scrape_loop(&mut page_loop, &mut sink, &checkpoint, start_page, MAX_PAGES) {
        Ok(summary) => {
            info!(
                "Scrape finished: {} pages, {} records written (last page {}).",
                summary.pages_processed, summary.records_written, summary.last_page
            );
            page_loop.into_driver().quit();
            Ok(())
        }
        Err(e) => {
            error!("Scrape aborted: {}", e);
            page_loop.into_driver().quit();
            process::exit(1);
        }
    }
}
