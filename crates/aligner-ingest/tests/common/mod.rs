//! Shared fixtures for the import integration tests
#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::Write;
use tempfile::NamedTempFile;

/// Header row of the activity export
pub const HEADER: [&str; 22] = [
    "ID",
    "Type",
    "Description",
    "Date Activity",
    "Updated At",
    "Destination ID",
    "Source ID",
    "Is Read",
    "Meta Data",
    "Patient ID",
    "Is Finition",
    "Treatment ID",
    "Email Sent",
    "Dentist First Name",
    "Dentist Last Name",
    "Dentist Email",
    "Dentist Type",
    "Commercial En Charge",
    "Commercial Name",
    "Suivi Portefeuille",
    "ID Invoice Pennylane",
    "Invoice Amount",
];

/// A complete, realistic export row with the given id, type and payload cell
pub fn activity_fields(id: i64, activity_type: &str, payload: &str) -> Vec<String> {
    vec![
        id.to_string(),
        activity_type.to_string(),
        format!("Activity {id}"),
        "juin 20, 2024, 1:29 PM".to_string(),
        "juin 21, 2024, 9:02 AM".to_string(),
        "12".to_string(),
        "4".to_string(),
        "False".to_string(),
        payload.to_string(),
        "6,977".to_string(),
        "False".to_string(),
        "1,204".to_string(),
        "True".to_string(),
        "Claire".to_string(),
        "Martin".to_string(),
        "claire.martin@cabinet.example".to_string(),
        "orthodontist".to_string(),
        "Paul".to_string(),
        "Paul Leroy".to_string(),
        "".to_string(),
        "".to_string(),
        "1299,00".to_string(),
    ]
}

/// Payload JSON text for a variant
pub fn payload(object_name: &str, data: Value) -> String {
    json!({
        "object_name": object_name,
        "number_of_aligners": 14,
        "number_of_refinements": "1",
        "number_of_retainers": null,
        "data": data,
    })
    .to_string()
}

/// Builds an export file row by row
#[derive(Default)]
pub struct ExportBuilder {
    rows: Vec<Vec<String>>,
}

impl ExportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activity(mut self, id: i64, activity_type: &str, payload: &str) -> Self {
        self.rows.push(activity_fields(id, activity_type, payload));
        self
    }

    pub fn raw(mut self, fields: &[&str]) -> Self {
        self.rows.push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Write the export with a header row to a temporary file
    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp export");
        {
            let mut writer = csv::WriterBuilder::new()
                .flexible(true)
                .from_writer(file.as_file_mut());
            writer.write_record(HEADER).expect("write header");
            for row in &self.rows {
                writer.write_record(row).expect("write row");
            }
            writer.flush().expect("flush export");
        }
        file.flush().expect("flush temp file");
        file
    }
}
