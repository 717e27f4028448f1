use std::collections::HashSet;
use std::io::{Cursor, Write};

use serde::Serialize;
use serde_json::Value;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{AppError, AppResult};
use crate::normalize::LeadRecord;

const EMAIL_FIELD: &str = "email";
const COMPANY_FIELD: &str = "company";
const SHEET_NAME: &str = "Leads";
const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.extension())
    }

    pub fn render(&self, records: &[LeadRecord]) -> AppResult<Vec<u8>> {
        match self {
            ExportFormat::Csv => to_delimited(records),
            ExportFormat::Xlsx => to_spreadsheet(records),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryMetrics {
    pub lead_count: usize,
    pub emails_found: usize,
    pub distinct_companies: usize,
}

/// Union of keys across all records, in first-seen order.
pub fn columns(records: &[LeadRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key) {
                columns.push(key.to_string());
            }
        }
    }
    columns
}

pub fn to_delimited(records: &[LeadRecord]) -> AppResult<Vec<u8>> {
    let columns = columns(records);
    // Rows without a header cannot be read back as records.
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|column| render_cell(record.get(column))))?;
    }
    writer
        .into_inner()
        .map_err(|err| AppError::Io(err.into_error()))
}

/// Single-sheet Office Open XML workbook holding the same table as the CSV.
pub fn to_spreadsheet(records: &[LeadRecord]) -> AppResult<Vec<u8>> {
    let sheet = worksheet(&columns(records), records)?;
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{SPREADSHEET_NS}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{SHEET_NAME}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    );

    let parts: [(&str, &[u8]); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes()),
        ("_rels/.rels", ROOT_RELS_XML.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_slice()),
    ];

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, contents) in parts {
        writer.start_file(name, options)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

pub fn summarize(records: &[LeadRecord]) -> SummaryMetrics {
    let emails_found = records
        .iter()
        .filter(|record| record.get(EMAIL_FIELD).is_some_and(has_content))
        .count();
    let distinct_companies = records
        .iter()
        .filter_map(|record| record.get(COMPANY_FIELD))
        .filter(|value| has_content(value))
        .map(|value| render_cell(Some(value)).trim().to_string())
        .collect::<HashSet<_>>()
        .len();

    SummaryMetrics {
        lead_count: records.len(),
        emails_found,
        distinct_companies,
    }
}

pub fn render_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}

fn worksheet(columns: &[String], records: &[LeadRecord]) -> AppResult<Vec<u8>> {
    let mut xml = Writer::new(Vec::new());
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    xml.write_event(Event::Start(
        BytesStart::new("worksheet").with_attributes([("xmlns", SPREADSHEET_NS)]),
    ))?;
    xml.write_event(Event::Start(BytesStart::new("sheetData")))?;
    if !columns.is_empty() {
        let header: Vec<Value> = columns
            .iter()
            .map(|column| Value::String(column.clone()))
            .collect();
        write_row(&mut xml, 1, header.iter().map(Some))?;
        for (index, record) in records.iter().enumerate() {
            let cells = columns.iter().map(|column| record.get(column));
            write_row(&mut xml, index + 2, cells)?;
        }
    }
    xml.write_event(Event::End(BytesEnd::new("sheetData")))?;
    xml.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(xml.into_inner())
}

fn write_row<'a>(
    xml: &mut Writer<Vec<u8>>,
    row_number: usize,
    cells: impl Iterator<Item = Option<&'a Value>>,
) -> AppResult<()> {
    let row = row_number.to_string();
    xml.write_event(Event::Start(
        BytesStart::new("row").with_attributes([("r", row.as_str())]),
    ))?;
    for (index, cell) in cells.enumerate() {
        let reference = format!("{}{row_number}", column_letter(index));
        match cell {
            None | Some(Value::Null) => {}
            Some(Value::Number(number)) => {
                xml.write_event(Event::Start(
                    BytesStart::new("c").with_attributes([("r", reference.as_str())]),
                ))?;
                xml.write_event(Event::Start(BytesStart::new("v")))?;
                xml.write_event(Event::Text(BytesText::new(&number.to_string())))?;
                xml.write_event(Event::End(BytesEnd::new("v")))?;
                xml.write_event(Event::End(BytesEnd::new("c")))?;
            }
            Some(value) => {
                xml.write_event(Event::Start(BytesStart::new("c").with_attributes([
                    ("r", reference.as_str()),
                    ("t", "inlineStr"),
                ])))?;
                xml.write_event(Event::Start(BytesStart::new("is")))?;
                xml.write_event(Event::Start(
                    BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
                ))?;
                let text = encode_cell_text(&render_cell(Some(value)));
                xml.write_event(Event::Text(BytesText::new(&text)))?;
                xml.write_event(Event::End(BytesEnd::new("t")))?;
                xml.write_event(Event::End(BytesEnd::new("is")))?;
                xml.write_event(Event::End(BytesEnd::new("c")))?;
            }
        }
    }
    xml.write_event(Event::End(BytesEnd::new("row")))?;
    Ok(())
}

fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// XML 1.0 cannot carry most control characters, so cell text stores them as
/// `_xHHHH_`. A literal `_xHHHH_` in the input gets its underscore escaped as
/// `_x005F_` so readers decode it back unchanged.
fn encode_cell_text(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for (offset, ch) in text.char_indices() {
        match ch {
            '\t' | '\n' | '\r' => encoded.push(ch),
            c if (c as u32) < 0x20 => {
                encoded.push_str(&format!("_x{:04X}_", c as u32));
            }
            '_' if is_escape_sequence(&text[offset..]) => encoded.push_str("_x005F_"),
            c => encoded.push(c),
        }
    }
    encoded
}

fn is_escape_sequence(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    bytes.len() >= 7
        && bytes[0] == b'_'
        && bytes[1] == b'x'
        && bytes[2..6].iter().all(u8::is_ascii_hexdigit)
        && bytes[6] == b'_'
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Read;

    use quick_xml::Reader;
    use serde_json::{json, Map};

    use super::*;

    fn record(value: Value) -> LeadRecord {
        match value {
            Value::Object(fields) => LeadRecord::from_fields(fields),
            _ => LeadRecord::from_fields(Map::new()),
        }
    }

    fn sample() -> Vec<LeadRecord> {
        vec![
            record(json!({"name": "A", "email": "a@x.com", "company": "Acme"})),
            record(json!({"name": "B", "title": "CTO, \"Ops\"", "company": "Acme"})),
            record(json!({"name": "C", "email": "", "company": null, "score": 7})),
        ]
    }

    #[test]
    fn columns_are_first_seen_union() {
        assert_eq!(
            columns(&sample()),
            vec!["name", "email", "company", "title", "score"]
        );
    }

    #[test]
    fn delimited_output_parses_back_to_same_pairs() {
        let records = sample();
        let bytes = to_delimited(&records).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<HashMap<String, String>> = reader
            .records()
            .map(|row| {
                let row = row.unwrap();
                headers
                    .iter()
                    .zip(row.iter())
                    .filter(|(_, cell)| !cell.is_empty())
                    .map(|(key, cell)| (key.to_string(), cell.to_string()))
                    .collect()
            })
            .collect();

        assert_eq!(rows.len(), records.len());
        for (parsed, original) in rows.iter().zip(records.iter()) {
            let expected: HashMap<String, String> = original
                .fields()
                .iter()
                .map(|(key, value)| (key.clone(), render_cell(Some(value))))
                .filter(|(_, cell)| !cell.is_empty())
                .collect();
            assert_eq!(parsed, &expected);
        }
    }

    fn sheet_xml(records: &[LeadRecord]) -> String {
        let bytes = to_spreadsheet(records).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        sheet
    }

    /// Text of every inline string cell, with `_xHHHH_` sequences decoded.
    fn inline_strings(sheet: &str) -> Vec<String> {
        let mut reader = Reader::from_str(sheet);
        let mut inside = false;
        let mut texts = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Start(tag) if tag.name().as_ref() == b"t" => inside = true,
                Event::End(tag) if tag.name().as_ref() == b"t" => inside = false,
                Event::Text(text) if inside => {
                    texts.push(decode_cell_text(&text.unescape().unwrap()))
                }
                Event::Eof => break,
                _ => {}
            }
        }
        texts
    }

    fn decode_cell_text(text: &str) -> String {
        let mut decoded = String::new();
        let mut rest = text;
        while !rest.is_empty() {
            if is_escape_sequence(rest) {
                let code = u32::from_str_radix(&rest[2..6], 16).unwrap();
                decoded.push(char::from_u32(code).unwrap());
                rest = &rest[7..];
            } else {
                let ch = rest.chars().next().unwrap();
                decoded.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
        decoded
    }

    #[test]
    fn empty_records_yield_empty_csv() {
        assert!(to_delimited(&[]).unwrap().is_empty());
    }

    #[test]
    fn records_without_fields_yield_empty_csv() {
        let records = vec![record(json!({})), record(json!({}))];
        assert!(to_delimited(&records).unwrap().is_empty());
        assert!(!sheet_xml(&records).contains("<row"));
    }

    #[test]
    fn empty_record_keeps_its_row_next_to_populated_ones() {
        let records = vec![record(json!({})), record(json!({"a": 1}))];
        let bytes = to_delimited(&records).unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["a"]);
        let cells: Vec<String> = reader
            .records()
            .map(|row| row.unwrap()[0].to_string())
            .collect();
        assert_eq!(cells, vec!["", "1"]);
    }

    #[test]
    fn spreadsheet_keeps_control_characters_and_escape_lookalikes() {
        let records = vec![record(json!({
            "note": "a\u{0001}b",
            "raw": "_x0041_ & <tag>",
        }))];
        let sheet = sheet_xml(&records);
        assert!(sheet.contains("a_x0001_b"));
        assert_eq!(
            inline_strings(&sheet),
            vec!["note", "raw", "a\u{0001}b", "_x0041_ & <tag>"]
        );

        let csv = String::from_utf8(to_delimited(&records).unwrap()).unwrap();
        assert!(csv.contains("a\u{0001}b"));
    }

    #[test]
    fn summarizes_emails_and_companies() {
        let metrics = summarize(&sample());
        assert_eq!(
            metrics,
            SummaryMetrics {
                lead_count: 3,
                emails_found: 1,
                distinct_companies: 1,
            }
        );
        assert_eq!(summarize(&[]), SummaryMetrics::default());
    }

    #[test]
    fn spreadsheet_is_a_workbook_with_one_sheet() {
        let bytes = to_spreadsheet(&sample()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(archive.by_name("xl/workbook.xml").is_ok());

        let sheet = sheet_xml(&sample());
        assert!(sheet.contains(r#"<c r="A1" t="inlineStr">"#));
        assert!(sheet.contains(r#"<c r="E4"><v>7</v></c>"#));
        assert!(inline_strings(&sheet).contains(&"CTO, \"Ops\"".to_string()));
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn export_format_metadata() {
        assert_eq!(ExportFormat::Csv.file_name("leads"), "leads.csv");
        assert_eq!(ExportFormat::Csv.mime_type(), "text/csv");
        assert!(ExportFormat::Xlsx.mime_type().contains("spreadsheetml"));
    }
}
