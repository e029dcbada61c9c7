use std::fs::OpenOptions;
use std::path::Path;
use scraper::{ElementRef, Html, Selector};

pub const RESIDENT_FIELDS: [&str; 7] = [
    "record_id", "first_name", "last_name", "address", "city_state", "zip", "phone",
];

/// One directory row as rendered on a results page. Cells that are missing
/// or empty stay empty strings rather than failing the row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidentRecord {
    pub record_id: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city_state: String,
    pub zip: String,
    pub phone: String,
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Extracts the result rows from one rendered page. Rows with fewer than
/// seven cells are not results (spacers, headers) and are skipped.
pub fn parse_result_rows(page_html: &str) -> Vec<ResidentRecord> {
    let document = Html::parse_document(page_html);
    let row_selector =
        Selector::parse("tr.search-result-stripe1, tr.search-result-stripe2").unwrap();
    let cell_selector = Selector::parse("td").unwrap();
    let input_selector = Selector::parse("input").unwrap();

    let mut records = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        if cells.len() < 7 {
            continue;
        }
        let record_id = cells[0]
            .select(&input_selector)
            .next()
            .and_then(|input| input.value().attr("value"))
            .unwrap_or_default()
            .to_string();
        records.push(ResidentRecord {
            record_id,
            first_name: cell_text(&cells[1]),
            last_name: cell_text(&cells[2]),
            address: cell_text(&cells[3]),
            city_state: cell_text(&cells[4]),
            zip: cell_text(&cells[5]),
            phone: cell_text(&cells[6]),
        });
    }
    records
}

/// Append-mode CSV output. The header is written only when the file is
/// created, so an interrupted run can reopen the same file and continue.
pub struct CsvSink {
    writer: csv::Writer<std::fs::File>,
}

impl CsvSink {
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self, csv::Error> {
        let file_exists = path.as_ref().exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !file_exists {
            writer.write_record(RESIDENT_FIELDS)?;
            writer.flush()?;
        }
        Ok(CsvSink { writer })
    }

    pub fn write(&mut self, record: &ResidentRecord) -> Result<(), csv::Error> {
        self.writer.write_record([
            &record.record_id,
            &record.first_name,
            &record.last_name,
            &record.address,
            &record.city_state,
            &record.zip,
            &record.phone,
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
