use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use log::{info, warn, error};
use thiserror::Error;

use crate::checkpoint::Checkpoint;
use crate::delay;
use crate::driver::{By, DriverError, PageDriver};
use crate::records::{parse_result_rows, CsvSink, ResidentRecord};

/// Locators for the directory site's result pages and export dialog.
pub struct Selectors {
    pub overlay: By,
    pub dialog_close: By,
    pub row_checkbox: By,
    pub select_all: By,
    pub max_record_modal: By,
    pub modal_close: By,
    pub download_popup: By,
    pub format_csv: By,
    pub level_detail: By,
    pub custom_name: By,
    pub download_continue: By,
    pub next_button: By,
    pub next_icon: By,
    pub page_input: By,
}

impl Default for Selectors {
    fn default() -> Self {
        Selectors {
            overlay: By::ClassName("ui-widget-overlay"),
            dialog_close: By::Css("a.ui-dialog-titlebar-close"),
            row_checkbox: By::Css("input[name='checkbox']"),
            select_all: By::Id("checkall"),
            max_record_modal: By::Id("maxRecordCountModal"),
            modal_close: By::Css("div.ui-dialog-buttonpane button"),
            download_popup: By::ClassName("jQDownloadPopUp"),
            format_csv: By::Id("download_format1"),
            level_detail: By::Id("download_level_detail1"),
            custom_name: By::Id("_customName"),
            download_continue: By::Css("button.download-continue"),
            next_button: By::Id("next_button_upper"),
            next_icon: By::Id("span_next_button_upper"),
            page_input: By::Name("paginationuppertextbox"),
        }
    }
}

pub struct LoopConfig {
    pub overlay_timeout: Duration,
    pub dismiss_timeout: Duration,
    /// How long to wait for the per-row selection controls to appear.
    pub records_timeout: Duration,
    /// Per-step wait inside the export dialog.
    pub dialog_timeout: Duration,
    /// Full page reloads allowed before a page is abandoned.
    pub reload_attempts: u32,
    pub settle_millis: u64,
    /// Suffix of the per-page export filename (`page{N}_<label>`).
    pub export_label: String,
    /// Where diagnostic snapshots land.
    pub debug_dir: PathBuf,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            overlay_timeout: Duration::from_secs(60),
            dismiss_timeout: Duration::from_secs(10),
            records_timeout: Duration::from_secs(60),
            dialog_timeout: Duration::from_secs(5),
            reload_attempts: 2,
            settle_millis: 500,
            export_label: "fulldetail_torrance".to_string(),
            debug_dir: PathBuf::from("."),
        }
    }
}

/// What a page visit does once its records are confirmed loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// Parse the rendered rows and hand them back for CSV output.
    ScrapeRows,
    /// Drive the site's own download dialog for the selected records.
    ExportDialog,
}

/// Result of processing one page, before pagination advance.
#[derive(Debug)]
pub enum PageStep {
    Rows(Vec<ResidentRecord>),
    Exported,
    /// Selection controls never appeared despite bounded reloads.
    NoRecords,
    /// Unrecoverable; a diagnostic snapshot has been captured.
    Fatal(String),
}

/// Result of requesting the next page.
#[derive(Debug, PartialEq)]
pub enum AdvanceOutcome {
    Advanced,
    /// The advance control is disabled: this was the final page.
    LastPage,
    /// Pagination controls are missing altogether.
    MissingControls,
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("page loop aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub pages_processed: u32,
    pub records_written: usize,
    pub last_page: u32,
}

/// One-page-at-a-time state machine over a paginated results UI:
/// `AwaitingOverlayClear -> RecordsLoaded | NoRecordsFound -> AllSelected ->
/// DownloadTriggered -> NextPageRequested`, with an absorbing error state
/// that captures a diagnostic snapshot. Each step returns a tagged result
/// instead of layering error handlers.
pub struct PageLoop<D> {
    driver: D,
    selectors: Selectors,
    config: LoopConfig,
    mode: PageMode,
}

impl<D: PageDriver> PageLoop<D> {
    pub fn new(driver: D, mode: PageMode, config: LoopConfig) -> Self {
        PageLoop { driver, selectors: Selectors::default(), config, mode }
    }

    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Jumps the UI to a previously checkpointed page via the pagination
    /// text box. Failure here is the hard resume-failure path.
    pub fn resume_to_page(&mut self, page: u32) -> Result<(), DriverError> {
        info!("Resuming from page {}...", page);
        let input = self.selectors.page_input;
        let rows = self.selectors.row_checkbox;
        self.driver.wait_visible(&input, Duration::from_secs(20))?;
        self.driver.fill(&input, &page.to_string())?;
        self.driver.press_enter(&input)?;
        self.driver.wait_visible(&rows, Duration::from_secs(30))?;
        info!("Page loaded. Continuing scrape...");
        Ok(())
    }

    pub fn run_page(&mut self, page: u32) -> PageStep {
        match self.mode {
            PageMode::ScrapeRows => self.scrape_page(page),
            PageMode::ExportDialog => self.export_page(page),
        }
    }

    fn scrape_page(&mut self, page: u32) -> PageStep {
        info!("Scraping page {}...", page);
        if !self.records_loaded(page) {
            return PageStep::NoRecords;
        }
        let html = match self.driver.page_source() {
            Ok(h) => h,
            Err(e) => {
                self.snapshot(page);
                return PageStep::Fatal(format!("could not read page source: {}", e));
            }
        };
        PageStep::Rows(parse_result_rows(&html))
    }

    fn export_page(&mut self, page: u32) -> PageStep {
        info!("Exporting page {}...", page);
        let mut attempts = 0;
        loop {
            if let Err(reason) = self.await_overlay_clear() {
                self.snapshot(page);
                return PageStep::Fatal(reason);
            }

            let present = match self.driver.count(&self.selectors.row_checkbox) {
                Ok(n) => n,
                Err(e) => {
                    self.snapshot(page);
                    return PageStep::Fatal(format!("row lookup failed: {}", e));
                }
            };
            if present == 0 {
                if attempts >= self.config.reload_attempts {
                    return PageStep::NoRecords;
                }
                attempts += 1;
                warn!("No checkboxes found on page {}. Refreshing (attempt {})...", page, attempts);
                if let Err(e) = self.driver.refresh() {
                    self.snapshot(page);
                    return PageStep::Fatal(format!("refresh failed: {}", e));
                }
                delay::settle(self.config.settle_millis);
                continue;
            }

            let select_all = self.selectors.select_all;
            if let Err(e) = self
                .driver
                .wait_visible(&select_all, self.config.dialog_timeout)
                .and_then(|_| self.driver.click(&select_all))
            {
                warn!("Could not select all records: {}", e);
                self.snapshot(page);
                return PageStep::Fatal(format!("select-all failed: {}", e));
            }
            delay::settle(self.config.settle_millis);
            info!("Selected all records on this page.");

            // Selecting across the remote record ceiling raises a warning
            // modal; the page must be reloaded rather than exported.
            let max_modal = self.selectors.max_record_modal;
            if self.driver.wait_visible(&max_modal, self.config.dialog_timeout).is_ok() {
                warn!("Too many records selected. Closing modal and refreshing page.");
                let modal_close = self.selectors.modal_close;
                if self.driver.click(&modal_close).is_err() {
                    let dialog_close = self.selectors.dialog_close;
                    let _ = self.driver.click(&dialog_close);
                }
                delay::settle(self.config.settle_millis);
                if let Err(e) = self.driver.refresh() {
                    self.snapshot(page);
                    return PageStep::Fatal(format!("refresh failed: {}", e));
                }
                if attempts >= self.config.reload_attempts {
                    return PageStep::NoRecords;
                }
                attempts += 1;
                continue;
            }

            return match self.trigger_download(page) {
                Ok(()) => PageStep::Exported,
                Err(reason) => {
                    error!("Download step failed on page {}: {}", page, reason);
                    self.snapshot(page);
                    PageStep::Fatal(reason)
                }
            };
        }
    }

    fn trigger_download(&mut self, page: u32) -> Result<(), String> {
        let s = &self.selectors;
        let (popup, format, detail, name_input, cont, overlay) = (
            s.download_popup, s.format_csv, s.level_detail, s.custom_name,
            s.download_continue, s.overlay,
        );

        self.driver.click(&popup).map_err(|e| format!("download button: {}", e))?;
        delay::settle(self.config.settle_millis);
        self.driver.click(&format).map_err(|e| format!("format option: {}", e))?;
        self.driver.click(&detail).map_err(|e| format!("detail option: {}", e))?;

        let filename = format!("page{}_{}", page, self.config.export_label);
        self.driver.fill(&name_input, &filename).map_err(|e| format!("filename input: {}", e))?;
        info!("Set export filename to: {}", filename);

        self.driver.click(&cont).map_err(|e| format!("continue button: {}", e))?;
        info!("Pressed 'Continue' in export dialog.");

        self.driver
            .wait_gone(&overlay, self.config.dialog_timeout)
            .map_err(|e| format!("download overlay never cleared: {}", e))?;
        info!("Download overlay cleared.");
        Ok(())
    }

    /// Advances pagination. In scrape mode the blocking overlay must clear
    /// first (the export path already waited inside the dialog step).
    pub fn advance(&mut self, page: u32) -> AdvanceOutcome {
        if self.mode == PageMode::ScrapeRows {
            if let Err(reason) = self.await_overlay_clear() {
                self.snapshot(page);
                return AdvanceOutcome::Fatal(reason);
            }
        }

        let next_icon = self.selectors.next_icon;
        let next_button = self.selectors.next_button;
        match self.driver.attribute(&next_icon, "class") {
            Ok(Some(class)) if class.contains("disabled-button") => {
                info!("Reached final page.");
                AdvanceOutcome::LastPage
            }
            Ok(_) => match self.driver.click(&next_button) {
                Ok(()) => {
                    delay::settle(self.config.settle_millis);
                    info!("Next page requested.");
                    AdvanceOutcome::Advanced
                }
                Err(DriverError::NotFound(_)) => {
                    self.snapshot(page);
                    AdvanceOutcome::MissingControls
                }
                Err(e) => AdvanceOutcome::Fatal(format!("next click failed: {}", e)),
            },
            Err(DriverError::NotFound(_)) => {
                self.snapshot(page);
                AdvanceOutcome::MissingControls
            }
            Err(e) => AdvanceOutcome::Fatal(format!("pagination state unreadable: {}", e)),
        }
    }

    /// Waits for the records to be present, reloading the page a bounded
    /// number of times when they are not.
    fn records_loaded(&mut self, page: u32) -> bool {
        let rows = self.selectors.row_checkbox;
        if self.driver.wait_visible(&rows, self.config.records_timeout).is_ok() {
            return true;
        }
        for attempt in 1..=self.config.reload_attempts {
            warn!(
                "No records on page {} after {:?}, retrying page refresh ({}/{})...",
                page, self.config.records_timeout, attempt, self.config.reload_attempts
            );
            if self.driver.refresh().is_err() {
                return false;
            }
            delay::settle(self.config.settle_millis);
            if self.driver.wait_visible(&rows, self.config.records_timeout).is_ok() {
                return true;
            }
        }
        error!("Still no records after refresh. Abandoning page {}.", page);
        false
    }

    /// Blocks until the overlay is gone; on timeout makes one manual
    /// dismiss attempt before giving up.
    fn await_overlay_clear(&mut self) -> Result<(), String> {
        let overlay = self.selectors.overlay;
        let dialog_close = self.selectors.dialog_close;

        if self.driver.wait_gone(&overlay, self.config.overlay_timeout).is_ok() {
            return Ok(());
        }
        warn!("Overlay did not disappear. Checking for close button...");
        self.driver
            .wait_visible(&dialog_close, self.config.dismiss_timeout)
            .and_then(|_| self.driver.click(&dialog_close))
            .map_err(|e| format!("overlay stuck and close button unusable: {}", e))?;
        self.driver
            .wait_gone(&overlay, self.config.dismiss_timeout)
            .map_err(|e| format!("overlay still present after manual close: {}", e))?;
        info!("Overlay closed via dialog button.");
        Ok(())
    }

    /// Best-effort diagnostic capture: a screenshot for the export flow,
    /// raw page markup for the scrape flow.
    fn snapshot(&mut self, page: u32) {
        match self.mode {
            PageMode::ExportDialog => {
                let path = self.config.debug_dir.join(format!("debug_page_{}.png", page));
                match self.driver.screenshot(&path) {
                    Ok(()) => info!("Screenshot saved: {:?}", path),
                    Err(e) => error!("Could not capture screenshot: {}", e),
                }
            }
            PageMode::ScrapeRows => {
                let path = self.config.debug_dir.join(format!("debug_page_{}.html", page));
                match self.driver.page_source() {
                    Ok(html) => {
                        if let Err(e) = fs::write(&path, html) {
                            error!("Could not write page snapshot: {}", e);
                        } else {
                            info!("Page markup saved: {:?}", path);
                        }
                    }
                    Err(e) => error!("Could not capture page source: {}", e),
                }
            }
        }
    }
}

/// Drives the scrape variant page by page: write rows, flush, checkpoint,
/// then request the next page, in that order, so a crash between
/// checkpoint and advance re-processes at most the current page.
pub fn run_scrape_loop<D: PageDriver>(
    page_loop: &mut PageLoop<D>,
    sink: &mut CsvSink,
    checkpoint: &Checkpoint,
    start_page: u32,
    max_pages: u32,
) -> Result<RunSummary, LoopError> {
    let mut summary = RunSummary::default();
    for page in start_page..=max_pages {
        match page_loop.run_page(page) {
            PageStep::Rows(rows) => {
                for row in &rows {
                    sink.write(row)?;
                }
                sink.flush()?;
                info!("Page {}: {} records written.", page, rows.len());
                checkpoint.write(page)?;
                summary.records_written += rows.len();
            }
            PageStep::Exported => {}
            PageStep::NoRecords => break,
            PageStep::Fatal(reason) => return Err(LoopError::Aborted(reason)),
        }
        summary.pages_processed += 1;
        summary.last_page = page;

        match page_loop.advance(page) {
            AdvanceOutcome::Advanced => {}
            AdvanceOutcome::LastPage => break,
            AdvanceOutcome::MissingControls => {
                error!("Next button missing. Ending pagination.");
                break;
            }
            AdvanceOutcome::Fatal(reason) => return Err(LoopError::Aborted(reason)),
        }
    }
    Ok(summary)
}

/// Drives the export variant. Unrecoverable page errors stop the loop
/// rather than failing the process; the diagnostic snapshot has already
/// been captured by then.
pub fn run_export_loop<D: PageDriver>(
    page_loop: &mut PageLoop<D>,
    start_page: u32,
    max_pages: u32,
) -> u32 {
    let mut exported = 0;
    for page in start_page..=max_pages {
        match page_loop.run_page(page) {
            PageStep::Exported | PageStep::Rows(_) => exported += 1,
            PageStep::NoRecords => {
                warn!("No records on page {}. Stopping.", page);
                break;
            }
            PageStep::Fatal(reason) => {
                error!("Stopping export at page {}: {}", page, reason);
                break;
            }
        }
        match page_loop.advance(page) {
            AdvanceOutcome::Advanced => {}
            AdvanceOutcome::LastPage => break,
            AdvanceOutcome::MissingControls => {
                error!("Next button missing. Ending pagination.");
                break;
            }
            AdvanceOutcome::Fatal(reason) => {
                error!("Stopping export at page {}: {}", page, reason);
                break;
            }
        }
    }
    exported
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;

    fn page_html(ids: &[&str]) -> String {
        let rows: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<tr class="search-result-stripe1">
                         <td><input name="checkbox" value="{id}"></td>
                         <td>First</td><td>Last</td><td>1 Elm St</td>
                         <td>Torrance, CA</td><td>90501</td><td>310-555-0000</td>
                       </tr>"#
                )
            })
            .collect();
        format!("<table>{}</table>", rows)
    }

    /// Scripted stand-in for the browser driver. Queues configure each
    /// interaction's outcome; everything else succeeds.
    #[derive(Default)]
    struct FakeDriver {
        pages: Vec<String>,
        pos: usize,
        /// Outcomes for wait_gone on the overlay; empty queue means clear.
        overlay_gone: VecDeque<bool>,
        /// Row-control counts consumed by both count() and wait_visible();
        /// empty queue means rows are present.
        records_present: VecDeque<usize>,
        dialog_close_visible: bool,
        /// Outcomes for wait_visible on the max-record modal.
        max_modal: VecDeque<bool>,
        /// Positions (0-based) at which the next control reports disabled.
        next_disabled_at: Option<usize>,
        clicks: Vec<By>,
        fills: Vec<(By, String)>,
        refreshes: usize,
        screenshots: Vec<std::path::PathBuf>,
    }

    impl FakeDriver {
        fn with_pages(ids_per_page: &[&[&str]]) -> Self {
            FakeDriver {
                pages: ids_per_page.iter().map(|ids| page_html(ids)).collect(),
                ..FakeDriver::default()
            }
        }

        fn current_page(&self) -> String {
            self.pages
                .get(self.pos)
                .cloned()
                .unwrap_or_else(|| "<html></html>".to_string())
        }
    }

    impl PageDriver for FakeDriver {
        fn navigate(&mut self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }
        fn title(&mut self) -> Result<String, DriverError> {
            Ok("results".to_string())
        }
        fn current_url(&mut self) -> Result<String, DriverError> {
            Ok("http://directory.example/results".to_string())
        }
        fn refresh(&mut self) -> Result<(), DriverError> {
            self.refreshes += 1;
            Ok(())
        }
        fn count(&mut self, locator: &By) -> Result<usize, DriverError> {
            if *locator == By::Css("input[name='checkbox']") {
                return Ok(self.records_present.pop_front().unwrap_or(1));
            }
            Ok(1)
        }
        fn click(&mut self, locator: &By) -> Result<(), DriverError> {
            self.clicks.push(*locator);
            if *locator == By::Id("next_button_upper") {
                self.pos += 1;
            }
            Ok(())
        }
        fn fill(&mut self, locator: &By, text: &str) -> Result<(), DriverError> {
            self.fills.push((*locator, text.to_string()));
            Ok(())
        }
        fn press_enter(&mut self, _locator: &By) -> Result<(), DriverError> {
            Ok(())
        }
        fn attribute(&mut self, locator: &By, name: &str) -> Result<Option<String>, DriverError> {
            if *locator == By::Id("span_next_button_upper") && name == "class" {
                let disabled = self.next_disabled_at == Some(self.pos);
                return Ok(Some(if disabled {
                    "next-span disabled-button".to_string()
                } else {
                    "next-span".to_string()
                }));
            }
            Ok(None)
        }
        fn wait_visible(&mut self, locator: &By, _timeout: Duration) -> Result<(), DriverError> {
            if *locator == By::Css("input[name='checkbox']") {
                return match self.records_present.pop_front().unwrap_or(1) {
                    0 => Err(DriverError::Timeout(locator.to_string())),
                    _ => Ok(()),
                };
            }
            if *locator == By::Css("a.ui-dialog-titlebar-close") {
                return if self.dialog_close_visible {
                    Ok(())
                } else {
                    Err(DriverError::Timeout(locator.to_string()))
                };
            }
            if *locator == By::Id("maxRecordCountModal") {
                return match self.max_modal.pop_front().unwrap_or(false) {
                    true => Ok(()),
                    false => Err(DriverError::Timeout(locator.to_string())),
                };
            }
            Ok(())
        }
        fn wait_gone(&mut self, locator: &By, _timeout: Duration) -> Result<(), DriverError> {
            if *locator == By::ClassName("ui-widget-overlay") {
                return match self.overlay_gone.pop_front().unwrap_or(true) {
                    true => Ok(()),
                    false => Err(DriverError::Timeout(locator.to_string())),
                };
            }
            Ok(())
        }
        fn page_source(&mut self) -> Result<String, DriverError> {
            Ok(self.current_page())
        }
        fn screenshot(&mut self, path: &Path) -> Result<(), DriverError> {
            self.screenshots.push(path.to_path_buf());
            Ok(())
        }
    }

    fn fast_config(debug_dir: &Path) -> LoopConfig {
        LoopConfig {
            settle_millis: 1,
            debug_dir: debug_dir.to_path_buf(),
            ..LoopConfig::default()
        }
    }

    #[test]
    fn scrape_loop_writes_all_pages_and_checkpoints_each() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            next_disabled_at: Some(1),
            ..FakeDriver::with_pages(&[&["R1001", "R1002"], &["R2001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(dir.path().join("out.csv")).unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("progress.txt"));

        let summary = run_scrape_loop(&mut lp, &mut sink, &checkpoint, 1, 100).unwrap();
        assert_eq!(summary.pages_processed, 2);
        assert_eq!(summary.records_written, 3);
        assert_eq!(checkpoint.read(), 2);

        let content = fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert_eq!(content.matches("R1001").count(), 1);
        assert_eq!(content.matches("R2001").count(), 1);
    }

    #[test]
    fn resuming_at_the_checkpoint_duplicates_at_most_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out.csv");
        let checkpoint = Checkpoint::new(dir.path().join("progress.txt"));

        // First run finishes both pages, then "crashes" before advancing.
        let driver = FakeDriver {
            next_disabled_at: Some(1),
            ..FakeDriver::with_pages(&[&["R1001"], &["R2001", "R2002"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(&csv_path).unwrap();
        run_scrape_loop(&mut lp, &mut sink, &checkpoint, 1, 100).unwrap();
        drop(sink);
        assert_eq!(checkpoint.read(), 2);

        // Restart resumes AT page 2, re-processing it.
        let driver = FakeDriver {
            next_disabled_at: Some(0),
            ..FakeDriver::with_pages(&[&["R2001", "R2002"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(&csv_path).unwrap();
        run_scrape_loop(&mut lp, &mut sink, &checkpoint, checkpoint.read(), 100).unwrap();

        let content = fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content.matches("R1001").count(), 1);
        assert_eq!(content.matches("R2001").count(), 2);
        assert_eq!(content.matches("R2002").count(), 2);
    }

    #[test]
    fn stuck_overlay_with_no_close_button_aborts_the_scrape() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            overlay_gone: VecDeque::from([false]),
            dialog_close_visible: false,
            ..FakeDriver::with_pages(&[&["R1001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(dir.path().join("out.csv")).unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("progress.txt"));

        let result = run_scrape_loop(&mut lp, &mut sink, &checkpoint, 1, 100);
        assert!(matches!(result, Err(LoopError::Aborted(_))));
        // Rows were written and checkpointed before the failed advance.
        assert_eq!(checkpoint.read(), 1);
        assert!(dir.path().join("debug_page_1.html").exists());
    }

    #[test]
    fn stuck_overlay_is_dismissed_once_via_the_close_button() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            overlay_gone: VecDeque::from([false, true]),
            dialog_close_visible: true,
            next_disabled_at: Some(0),
            ..FakeDriver::with_pages(&[&["R1001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(dir.path().join("out.csv")).unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("progress.txt"));

        let summary = run_scrape_loop(&mut lp, &mut sink, &checkpoint, 1, 100).unwrap();
        assert_eq!(summary.records_written, 1);
        assert!(lp
            .driver_mut()
            .clicks
            .contains(&By::Css("a.ui-dialog-titlebar-close")));
    }

    #[test]
    fn missing_records_abandons_the_page_after_bounded_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            records_present: VecDeque::from([0, 0, 0]),
            ..FakeDriver::with_pages(&[&[]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ScrapeRows, fast_config(dir.path()));
        let mut sink = CsvSink::append(dir.path().join("out.csv")).unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("progress.txt"));

        let summary = run_scrape_loop(&mut lp, &mut sink, &checkpoint, 1, 100).unwrap();
        assert_eq!(summary.records_written, 0);
        assert_eq!(lp.driver_mut().refreshes, 2);
    }

    #[test]
    fn export_retries_after_the_max_record_modal_then_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            max_modal: VecDeque::from([true, false]),
            next_disabled_at: Some(0),
            ..FakeDriver::with_pages(&[&["R1001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ExportDialog, fast_config(dir.path()));

        let exported = run_export_loop(&mut lp, 1, 100);
        assert_eq!(exported, 1);

        let driver = lp.driver_mut();
        assert_eq!(driver.refreshes, 1);
        assert!(driver.clicks.contains(&By::Css("button.download-continue")));
        assert_eq!(
            driver.fills.last(),
            Some(&(By::Id("_customName"), "page1_fulldetail_torrance".to_string()))
        );
    }

    #[test]
    fn export_stops_soft_when_the_overlay_never_clears() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            overlay_gone: VecDeque::from([false]),
            dialog_close_visible: false,
            ..FakeDriver::with_pages(&[&["R1001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ExportDialog, fast_config(dir.path()));

        let exported = run_export_loop(&mut lp, 1, 100);
        assert_eq!(exported, 0);
        assert_eq!(lp.driver_mut().screenshots.len(), 1);
    }

    #[test]
    fn disabled_next_control_ends_the_export_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver {
            next_disabled_at: Some(0),
            ..FakeDriver::with_pages(&[&["R1001"]])
        };
        let mut lp = PageLoop::new(driver, PageMode::ExportDialog, fast_config(dir.path()));

        let exported = run_export_loop(&mut lp, 1, 100);
        assert_eq!(exported, 1);
        assert!(!lp.driver_mut().clicks.contains(&By::Id("next_button_upper")));
    }
}
