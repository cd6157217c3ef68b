//! Statement ingestion: CSV/OFX parsing and batch import
//!
//! Parsing is pure (bytes in, rows out); the [`StatementImporter`] wraps it
//! in the transactional import protocol: hash the file, refuse duplicates,
//! persist the batch and its entries in one unit of work, and emit lifecycle
//! events. Partial imports never commit.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventBus};
use crate::models::{ImportBatch, ImportSource, Metadata, StatementEntry};
use crate::money::{parse_amount, Currency};

/// A statement row parsed from a source file, before persistence.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub external_id: String,
    pub payee: Option<String>,
    pub memo: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,
}

/// Result of a successful import.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub batch_id: Uuid,
    pub source: ImportSource,
    pub entries_imported: usize,
    pub file_sha256: String,
}

/// Lowercase hex SHA-256 of the file bytes (the batch content address).
pub fn file_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// --- CSV (Nubank format) --------------------------------------------------

const DATE_ALIASES: &[&str] = &["date", "data"];
const DESCRIPTION_ALIASES: &[&str] = &["description", "descrição", "descricao"];
const AMOUNT_ALIASES: &[&str] = &["amount", "valor"];
const ID_ALIASES: &[&str] = &["id", "identificador", "external_id"];
const CURRENCY_ALIASES: &[&str] = &["currency", "moeda"];

fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let normalized = header.trim().trim_start_matches('\u{feff}').to_lowercase();
        aliases.contains(&normalized.as_str())
    })
}

fn parse_csv_date(text: &str) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight")));
        }
    }
    Err(Error::InvalidDateFormat(text.to_string()))
}

/// Parse a Nubank-style CSV statement.
///
/// Headers are matched by case-insensitive aliases (English and Portuguese).
/// Rows that gained extra columns from an unquoted decimal comma are
/// stitched back together before the amount is parsed.
pub fn parse_nubank_csv(
    bytes: &[u8],
    filename: &str,
    default_currency: &Currency,
) -> Result<Vec<ParsedEntry>> {
    // UTF-8 BOM tolerance
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let date_idx = find_column(&headers, DATE_ALIASES)
        .ok_or_else(|| Error::InvalidData("missing date column".to_string()))?;
    let description_idx = find_column(&headers, DESCRIPTION_ALIASES)
        .ok_or_else(|| Error::InvalidData("missing description column".to_string()))?;
    let amount_idx = find_column(&headers, AMOUNT_ALIASES)
        .ok_or_else(|| Error::InvalidData("missing amount column".to_string()))?;
    let id_idx = find_column(&headers, ID_ALIASES);
    let currency_idx = find_column(&headers, CURRENCY_ALIASES);

    let mut entries = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let row_number = index + 1;

        // Extra fields appear when an unquoted amount like "-123,45" splits
        // at its decimal comma; fold them back into the amount column.
        let extra = record.len().saturating_sub(headers.len());
        let field = |idx: usize| -> Option<&str> {
            let shifted = if idx > amount_idx { idx + extra } else { idx };
            record.get(shifted).map(str::trim).filter(|s| !s.is_empty())
        };
        let amount_text = if extra > 0 {
            (amount_idx..=amount_idx + extra)
                .filter_map(|i| record.get(i))
                .collect::<Vec<_>>()
                .join(",")
        } else {
            field(amount_idx).unwrap_or_default().to_string()
        };

        let date_text = field(date_idx)
            .ok_or_else(|| Error::InvalidDateFormat(format!("row {row_number}: empty date")))?;
        let occurred_at = parse_csv_date(date_text)?;
        let memo = field(description_idx).unwrap_or_default().to_string();
        let amount = parse_amount(&amount_text)?;

        let external_id = id_idx
            .and_then(field)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{filename}:row:{row_number}"));
        let currency = match currency_idx.and_then(field) {
            Some(code) => Currency::new(code)?,
            None => default_currency.clone(),
        };

        entries.push(ParsedEntry {
            external_id,
            payee: None,
            memo,
            amount,
            currency,
            occurred_at,
        });
    }

    debug!("Parsed {} CSV rows from {}", entries.len(), filename);
    Ok(entries)
}

// --- OFX ------------------------------------------------------------------

fn decode_ofx(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // Latin-1 fallback: every byte maps to the code point of equal value
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn parse_ofx_datetime(text: &str) -> Result<DateTime<Utc>> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 14 {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&digits[..14], "%Y%m%d%H%M%S") {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    if digits.len() >= 8 {
        if let Ok(date) = NaiveDate::parse_from_str(&digits[..8], "%Y%m%d") {
            return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight")));
        }
    }
    Err(Error::InvalidDateFormat(text.to_string()))
}

/// Parse an OFX statement with an SGML-tolerant line scanner.
///
/// Only `<CURDEF>` and the fields inside `<STMTTRN>` blocks are read;
/// everything else is ignored.
pub fn parse_ofx(
    bytes: &[u8],
    filename: &str,
    default_currency: &Currency,
) -> Result<Vec<ParsedEntry>> {
    let text = decode_ofx(bytes);
    let tag_value = Regex::new(r"^<([A-Za-z0-9_]+)>([^<\r\n]*)").expect("static regex");

    let mut header_currency: Option<Currency> = None;
    let mut current: Option<Vec<(String, String)>> = None;
    let mut entries = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let upper = line.to_uppercase();
        if header_currency.is_none() && upper.starts_with("<CURDEF>") {
            let value = line.split('>').nth(1).unwrap_or_default();
            let code = value.split('<').next().unwrap_or_default().trim();
            header_currency = Currency::new(code).ok();
        }

        if upper.starts_with("<STMTTRN>") {
            current = Some(Vec::new());
            continue;
        }
        if upper.starts_with("</STMTTRN>") {
            if let Some(fields) = current.take() {
                let get = |tag: &str| {
                    fields
                        .iter()
                        .find(|(name, _)| name == tag)
                        .map(|(_, value)| value.as_str())
                        .filter(|v| !v.is_empty())
                };

                let occurred_at = parse_ofx_datetime(get("DTPOSTED").unwrap_or_default())?;
                let amount_text = get("TRNAMT").unwrap_or("0");
                let amount = Decimal::from_str(amount_text)
                    .or_else(|_| parse_amount(amount_text))?;

                let name = get("NAME").unwrap_or_default();
                let memo_field = get("MEMO").unwrap_or_default();
                let memo = match (name.is_empty(), memo_field.is_empty()) {
                    (false, false) => format!("{name} - {memo_field}"),
                    (false, true) => name.to_string(),
                    _ => memo_field.to_string(),
                };

                let external_id = get("FITID")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}:row:{}", filename, entries.len() + 1));
                let currency = match get("CURRENCY") {
                    Some(code) => Currency::new(code)?,
                    None => header_currency
                        .clone()
                        .unwrap_or_else(|| default_currency.clone()),
                };

                entries.push(ParsedEntry {
                    external_id,
                    payee: (!name.is_empty()).then(|| name.to_string()),
                    memo,
                    amount,
                    currency,
                    occurred_at,
                });
            }
            continue;
        }

        if let Some(fields) = current.as_mut() {
            if let Some(captures) = tag_value.captures(line) {
                let tag = captures[1].to_uppercase();
                let value = captures[2].trim().to_string();
                fields.push((tag, value));
            }
        }
    }

    debug!("Parsed {} OFX transactions from {}", entries.len(), filename);
    Ok(entries)
}

/// Dispatch to the parser for a source.
pub fn parse_statement(
    source: ImportSource,
    bytes: &[u8],
    filename: &str,
    default_currency: &Currency,
) -> Result<Vec<ParsedEntry>> {
    match source {
        ImportSource::NubankCsv => parse_nubank_csv(bytes, filename, default_currency),
        ImportSource::Ofx => parse_ofx(bytes, filename, default_currency),
    }
}

// --- importer -------------------------------------------------------------

/// Runs the transactional import protocol against the database.
pub struct StatementImporter<'a> {
    db: &'a Database,
    bus: &'a EventBus,
}

impl<'a> StatementImporter<'a> {
    pub fn new(db: &'a Database, bus: &'a EventBus) -> Self {
        Self { db, bus }
    }

    /// Import a statement file as a content-addressed batch.
    ///
    /// Re-importing bytes already held by a non-reversed batch fails with
    /// [`Error::DuplicateImport`] carrying the existing batch id. On a parse
    /// or persistence failure nothing of the attempt survives except a
    /// FAILED batch recording the error.
    pub fn import(
        &self,
        source: ImportSource,
        filename: &str,
        bytes: &[u8],
        default_currency: &Currency,
        account_hint: Option<&str>,
    ) -> Result<ImportOutcome> {
        let digest = file_sha256(bytes);

        let uow = self.db.unit_of_work()?;
        if let Some(existing) = uow.batches().find_by_sha256_active(&digest)? {
            return Err(Error::DuplicateImport {
                existing: existing.id,
            });
        }

        let mut metadata = Metadata::new();
        if let Some(hint) = account_hint {
            metadata.insert("account_hint".to_string(), json!(hint));
        }
        let mut batch = ImportBatch::new(source, filename, &digest, metadata.clone());
        uow.batches().add(&batch)?;

        let persisted = self.persist_entries(&uow, &batch, source, filename, bytes, default_currency, &metadata);
        match persisted {
            Ok(count) => {
                batch.complete(count as i64)?;
                uow.batches().save(&batch)?;
                uow.commit()?;

                info!(
                    "Imported {} as batch {} ({} entries)",
                    filename, batch.id, count
                );
                self.bus.publish(&DomainEvent::StatementImported {
                    batch_id: batch.id,
                    source,
                    entries_count: count,
                    file_sha256: digest.clone(),
                });

                Ok(ImportOutcome {
                    batch_id: batch.id,
                    source,
                    entries_imported: count,
                    file_sha256: digest,
                })
            }
            Err(err) => {
                // Discard the partial batch, then record the failure on its own.
                uow.rollback()?;
                self.record_failure(source, filename, &digest, metadata, &err)?;
                self.bus.publish(&DomainEvent::StatementImportFailed {
                    source,
                    filename: filename.to_string(),
                    error_message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_entries(
        &self,
        uow: &crate::db::UnitOfWork,
        batch: &ImportBatch,
        source: ImportSource,
        filename: &str,
        bytes: &[u8],
        default_currency: &Currency,
        metadata: &Metadata,
    ) -> Result<usize> {
        let rows = parse_statement(source, bytes, filename, default_currency)?;
        for row in &rows {
            let entry = StatementEntry::new(
                batch.id,
                &row.external_id,
                row.payee.as_deref(),
                &row.memo,
                row.amount,
                row.currency.clone(),
                row.occurred_at,
                metadata.clone(),
            );
            uow.entries().add(&entry)?;
        }
        Ok(rows.len())
    }

    fn record_failure(
        &self,
        source: ImportSource,
        filename: &str,
        digest: &str,
        metadata: Metadata,
        err: &Error,
    ) -> Result<()> {
        let uow = self.db.unit_of_work()?;
        let mut failed = ImportBatch::new(source, filename, digest, metadata);
        failed.fail(&err.to_string())?;
        uow.batches().add(&failed)?;
        uow.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn brl() -> Currency {
        Currency::new("BRL").unwrap()
    }

    #[test]
    fn test_parse_csv_iso_dates() {
        let csv = "date,description,amount\n2025-08-01,Salario Empresa,5000.00\n";
        let entries = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].memo, "Salario Empresa");
        assert_eq!(entries[0].amount, dec!(5000.00));
        assert_eq!(entries[0].occurred_at.date_naive().to_string(), "2025-08-01");
        assert_eq!(entries[0].external_id, "aug.csv:row:1");
    }

    #[test]
    fn test_parse_csv_portuguese_aliases_and_br_dates() {
        let csv = "Data,Descrição,Valor,Identificador\n15/08/2025,Mercado Pão,\"-123,45\",abc-1\n";
        let entries = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl()).unwrap();
        assert_eq!(entries[0].amount, dec!(-123.45));
        assert_eq!(entries[0].external_id, "abc-1");
        assert_eq!(entries[0].occurred_at.date_naive().to_string(), "2025-08-15");
    }

    #[test]
    fn test_parse_csv_iso_datetime_keeps_time() {
        let csv = "date,description,amount\n2025-08-01T14:30:00,Almoço,-32.50\n";
        let entries = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl()).unwrap();
        assert_eq!(
            entries[0].occurred_at.to_rfc3339(),
            "2025-08-01T14:30:00+00:00"
        );
    }

    #[test]
    fn test_parse_csv_stitches_comma_decimal_split() {
        // unquoted "-123,45" splits into two fields
        let csv = "date,description,amount\n2025-08-01,Mercado,-123,45\n";
        let entries = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl()).unwrap();
        assert_eq!(entries[0].amount, dec!(-123.45));
    }

    #[test]
    fn test_parse_csv_bom_and_currency_column() {
        let csv = "\u{feff}date,description,amount,currency\n2025-08-01,Coffee,-5.00,USD\n";
        let entries = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl()).unwrap();
        assert_eq!(entries[0].currency.as_str(), "USD");
    }

    #[test]
    fn test_parse_csv_bad_amount_is_an_error() {
        let csv = "date,description,amount\n2025-08-01,Broken,not-a-number\n";
        let result = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl());
        assert!(matches!(result, Err(Error::ParseAmount(_))));
    }

    #[test]
    fn test_parse_csv_bad_date_is_an_error() {
        let csv = "date,description,amount\n08-01-2025,Broken,10.00\n";
        let result = parse_nubank_csv(csv.as_bytes(), "aug.csv", &brl());
        assert!(matches!(result, Err(Error::InvalidDateFormat(_))));
    }

    const OFX_SAMPLE: &str = r#"OFXHEADER:100
DATA:OFXSGML

<OFX>
<BANKMSGSRSV1>
<STMTTRNRS>
<STMTRS>
<CURDEF>BRL
<BANKTRANLIST>
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20250801120000[-3:BRT]
<TRNAMT>-45.10
<FITID>2025080101
<NAME>UBER
<MEMO>TRIP HOME
</STMTTRN>
<STMTTRN>
<TRNTYPE>CREDIT
<DTPOSTED>20250805
<TRNAMT>5000.00
<NAME>EMPRESA LTDA
</STMTTRN>
</BANKTRANLIST>
</STMTRS>
</STMTTRNRS>
</BANKMSGSRSV1>
</OFX>
"#;

    #[test]
    fn test_parse_ofx_blocks() {
        let entries = parse_ofx(OFX_SAMPLE.as_bytes(), "aug.ofx", &Currency::new("USD").unwrap()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].external_id, "2025080101");
        assert_eq!(entries[0].memo, "UBER - TRIP HOME");
        assert_eq!(entries[0].payee.as_deref(), Some("UBER"));
        assert_eq!(entries[0].amount, dec!(-45.10));
        // CURDEF wins over the importer default
        assert_eq!(entries[0].currency.as_str(), "BRL");
        assert_eq!(
            entries[0].occurred_at.to_rfc3339(),
            "2025-08-01T12:00:00+00:00"
        );

        // date-only DTPOSTED, no FITID, no MEMO
        assert_eq!(entries[1].external_id, "aug.ofx:row:2");
        assert_eq!(entries[1].memo, "EMPRESA LTDA");
        assert_eq!(entries[1].occurred_at.date_naive().to_string(), "2025-08-05");
    }

    #[test]
    fn test_parse_ofx_latin1_fallback() {
        // 0xE3 is "ã" in Latin-1 but invalid on its own in UTF-8
        let bytes = b"<CURDEF>BRL\n<STMTTRN>\n<DTPOSTED>20250801000000\n<TRNAMT>-1.00\n<NAME>P\xE3O DE ACUCAR\n</STMTTRN>\n";
        let entries = parse_ofx(bytes, "x.ofx", &brl()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payee.as_deref(), Some("PãO DE ACUCAR"));
    }

    #[test]
    fn test_file_sha256_is_lowercase_hex() {
        let digest = file_sha256(b"hello");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_importer_duplicate_and_failure_paths() {
        let db = Database::for_tests().unwrap();
        let bus = EventBus::new();
        let importer = StatementImporter::new(&db, &bus);

        let csv = "date,description,amount\n2025-08-01,Salario,5000.00\n";
        let outcome = importer
            .import(ImportSource::NubankCsv, "aug.csv", csv.as_bytes(), &brl(), None)
            .unwrap();
        assert_eq!(outcome.entries_imported, 1);

        // same bytes again: duplicate, nothing new persisted
        let dup = importer.import(ImportSource::NubankCsv, "aug2.csv", csv.as_bytes(), &brl(), None);
        match dup {
            Err(Error::DuplicateImport { existing }) => assert_eq!(existing, outcome.batch_id),
            other => panic!("expected DuplicateImport, got {other:?}"),
        }

        // a broken file leaves only a FAILED batch behind
        let broken = "date,description,amount\n2025-08-01,Broken,xx\n";
        assert!(importer
            .import(ImportSource::NubankCsv, "bad.csv", broken.as_bytes(), &brl(), None)
            .is_err());

        let uow = db.reader().unwrap();
        let batches = uow.batches().list_recent(10).unwrap();
        assert_eq!(batches.len(), 2);
        let failed = batches
            .iter()
            .find(|b| b.filename == "bad.csv")
            .expect("failed batch recorded");
        assert_eq!(failed.status, crate::models::BatchStatus::Failed);
        assert!(failed.error_message.is_some());
        assert_eq!(uow.entries().find_by_batch(failed.id).unwrap().len(), 0);
    }
}
