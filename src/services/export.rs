//! CSV export of job results.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::models::ExtractedContract;
use crate::repository::Database;

const HEADERS: &[&str] = &[
    "Filename",
    "Contract Name",
    "Contract Type",
    "Company Type",
    "Signing Party",
    "Country",
    "Address",
    "Signed Date",
    "Signature Status",
    "Telenity Entity",
    "Telenity Entity Name",
    "Confidence",
    "Needs Review",
    "Review Reason",
    "Status",
];

/// Write all records of a job to `Contracts_Report_{timestamp}.csv`
/// under `output_dir`, returning the file path.
pub fn export_job(db: &Database, job_id: i64, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let contracts = db.contracts_for_job(job_id)?;
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!(
        "Contracts_Report_{}.csv",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    write_csv(&contracts, &path)?;
    info!("Exported {} records to {}", contracts.len(), path.display());
    Ok(path)
}

pub fn write_csv(contracts: &[ExtractedContract], path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(HEADERS)?;
    for c in contracts {
        writer.write_record([
            c.filename.as_str(),
            c.title.as_str(),
            c.contract_type.as_str(),
            c.company_type.as_str(),
            c.signing_party.as_str(),
            c.country.as_str(),
            c.address.as_str(),
            c.signed_date.as_str(),
            c.signature_status.as_str(),
            c.telenity_entity_code.as_str(),
            c.telenity_entity_name.as_str(),
            &c.confidence_score.to_string(),
            if c.needs_review { "yes" } else { "no" },
            c.review_reason.as_str(),
            c.status_note.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_round_trips_turkish_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let contract = ExtractedContract {
            filename: "sözleşme.pdf".to_string(),
            signing_party: "XYZ Teknoloji Ltd.".to_string(),
            address: "Çamlıca, \"B\" Blok, İstanbul".to_string(),
            confidence_score: 77,
            needs_review: true,
            ..Default::default()
        };
        write_csv(&[contract], &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "sözleşme.pdf");
        assert_eq!(&record[6], "Çamlıca, \"B\" Blok, İstanbul");
        assert_eq!(&record[11], "77");
        assert_eq!(&record[12], "yes");
    }
}
