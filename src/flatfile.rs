//! Expense records kept as comma-separated lines, one file per owner.
//!
//! Each file starts with the header `Category,Amount,Date` followed by
//! `category,amount,timestamp[,note]` records. A record's id is its position in the
//! file (the header is position 0), so ids of later records shift after a delete.
//! Records that cannot be read back are skipped, but rewrites keep their bytes.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDateTime;
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Expense, ExpenseFilter, NewExpense, TIMESTAMP_FORMAT};
use crate::store::ExpenseStore;

const HEADER: [&str; 3] = ["Category", "Amount", "Date"];

pub struct FlatFileExpenses {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FlatFileExpenses {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, owner: i64) -> PathBuf {
        self.dir.join(format!("user-{owner}.txt"))
    }

    /// All raw records with their positions. A missing file reads as empty.
    fn read_records(&self, owner: i64) -> Result<Vec<(i64, ByteRecord)>> {
        let file = match File::open(self.path(owner)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut out = Vec::new();
        for (position, record) in reader.byte_records().enumerate() {
            match record {
                Ok(record) => out.push((position as i64, record)),
                Err(e) => debug!("skipping unreadable record {position} for user {owner}: {e}"),
            }
        }
        Ok(out)
    }

    /// Replaces the file with a header plus `records`. The new content is written to a
    /// sibling file first and renamed over the old one.
    fn rewrite(&self, owner: i64, records: &[ByteRecord]) -> Result<()> {
        let path = self.path(owner);
        let staging = path.with_extension("txt.tmp");
        let mut writer = WriterBuilder::new().flexible(true).from_path(&staging)?;
        writer.write_record(HEADER)?;
        for record in records {
            writer.write_byte_record(record)?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

fn is_header(record: &ByteRecord) -> bool {
    record.iter().eq(HEADER.iter().map(|name| name.as_bytes()))
}

fn field(record: &ByteRecord, index: usize) -> Option<&str> {
    std::str::from_utf8(record.get(index)?).ok().map(str::trim)
}

/// `true` when the file has content whose last byte is not a newline.
fn missing_final_newline(file: &mut File, len: u64) -> Result<bool> {
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Parses one stored record; `None` for the header and for malformed lines.
fn parse_record(owner: i64, id: i64, record: &ByteRecord) -> Option<Expense> {
    if !(3..=4).contains(&record.len()) {
        return None;
    }
    let amount: f64 = field(record, 1)?.parse().ok()?;
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let spent_at = NaiveDateTime::parse_from_str(field(record, 2)?, TIMESTAMP_FORMAT).ok()?;
    let note = match record.get(3) {
        Some(_) => Some(field(record, 3)?).filter(|note| !note.is_empty()).map(str::to_string),
        None => None,
    };
    Some(Expense {
        id,
        owner,
        category: field(record, 0)?.to_string(),
        amount,
        spent_at,
        note,
    })
}

impl ExpenseStore for FlatFileExpenses {
    fn append(&self, owner: i64, expense: &NewExpense) -> Result<i64> {
        let _guard = self.write_lock.lock().map_err(|_| Error::Poisoned)?;
        let next_id = match self.read_records(owner)?.last() {
            Some((position, _)) => position + 1,
            None => 1,
        };
        let path = self.path(owner);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        if missing_final_newline(&mut file, len)? {
            file.write_all(b"\n")?;
        }
        let mut writer = WriterBuilder::new().flexible(true).from_writer(file);
        if len == 0 {
            writer.write_record(HEADER)?;
        }
        let amount = expense.amount.to_string();
        let spent_at = expense.spent_at.format(TIMESTAMP_FORMAT).to_string();
        let mut record = vec![expense.category.as_str(), amount.as_str(), spent_at.as_str()];
        if let Some(note) = expense.note.as_deref().filter(|note| !note.is_empty()) {
            record.push(note);
        }
        writer.write_record(record)?;
        writer.flush()?;
        Ok(next_id)
    }

    fn list(&self, owner: i64, filter: &ExpenseFilter) -> Result<Vec<Expense>> {
        let mut out = Vec::new();
        for (position, record) in self.read_records(owner)? {
            match parse_record(owner, position, &record) {
                Some(expense) if filter.matches(&expense) => out.push(expense),
                Some(_) => {}
                None if is_header(&record) => {}
                None => debug!("skipping malformed line {position} for user {owner}"),
            }
        }
        out.sort_by(|a, b| b.spent_at.cmp(&a.spent_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn delete(&self, owner: i64, id: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().map_err(|_| Error::Poisoned)?;
        let records = self.read_records(owner)?;
        let found = records
            .iter()
            .any(|(position, record)| *position == id && parse_record(owner, id, record).is_some());
        if !found {
            return Ok(false);
        }
        let kept = records
            .into_iter()
            .filter(|(position, record)| *position != id && !is_header(record))
            .map(|(_, record)| record)
            .collect::<Vec<_>>();
        self.rewrite(owner, &kept)?;
        Ok(true)
    }

    fn clear(&self, owner: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().map_err(|_| Error::Poisoned)?;
        let removed = self
            .read_records(owner)?
            .iter()
            .filter(|(position, record)| parse_record(owner, *position, record).is_some())
            .count();
        if self.path(owner).exists() {
            self.rewrite(owner, &[])?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn expense(category: &str, amount: f64, spent_at: NaiveDateTime, note: Option<&str>) -> NewExpense {
        NewExpense {
            category: category.to_string(),
            amount,
            spent_at,
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileExpenses::new(dir.path());
        assert!(store.list(1, &ExpenseFilter::default()).unwrap().is_empty());
        assert!(!store.delete(1, 1).unwrap());
        assert_eq!(store.clear(1).unwrap(), 0);
    }

    #[test]
    fn appended_records_use_the_flat_format() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileExpenses::new(dir.path());
        let first = store.append(7, &expense("Food", 250.0, at(2024, 3, 1), None)).unwrap();
        let second = store
            .append(7, &expense("Bills", 99.5, at(2024, 3, 2), Some("power, water")))
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let raw = std::fs::read_to_string(dir.path().join("user-7.txt")).unwrap();
        assert_eq!(
            raw,
            "Category,Amount,Date\n\
             Food,250,2024-03-01 10:30:00\n\
             Bills,99.5,2024-03-02 10:30:00,\"power, water\"\n"
        );

        let listed = store.list(7, &ExpenseFilter::default()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].category, "Bills");
        assert_eq!(listed[0].note.as_deref(), Some("power, water"));
        assert_eq!(listed[1].id, 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("user-3.txt"),
            "Category,Amount,Date\n\
             Food,12,2024-01-01 08:00:00\n\
             Food,twelve,2024-01-01 08:00:00\n\
             Food,12\n\
             Food,12,yesterday\n\
             Food,-4,2024-01-01 08:00:00\n\
             Travel,40,2024-01-02 08:00:00,train,extra,fields\n\
             Travel,40,2024-01-02 09:00:00,train\n",
        )
        .unwrap();
        let store = FlatFileExpenses::new(dir.path());
        let listed = store.list(3, &ExpenseFilter::default()).unwrap();
        let ids = listed.iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids, [7, 1]);
        assert_eq!(listed[0].note.as_deref(), Some("train"));
    }

    #[test]
    fn files_without_a_header_still_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("user-1.txt"),
            "Shopping,30,2024-05-05 12:00:00\n",
        )
        .unwrap();
        let store = FlatFileExpenses::new(dir.path());
        let listed = store.list(1, &ExpenseFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, 0);
    }

    #[test]
    fn append_starts_a_new_line_after_an_unterminated_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user-1.txt");
        std::fs::write(&path, "Category,Amount,Date\nShopping,30,2024-05-05 12:00:00").unwrap();
        let store = FlatFileExpenses::new(dir.path());

        let id = store.append(1, &expense("Food", 12.0, at(2024, 5, 6), None)).unwrap();
        assert_eq!(id, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Category,Amount,Date\n\
             Shopping,30,2024-05-05 12:00:00\n\
             Food,12,2024-05-06 10:30:00\n"
        );
        let listed = store.list(1, &ExpenseFilter::default()).unwrap();
        let categories = listed.iter().map(|e| e.category.as_str()).collect::<Vec<_>>();
        assert_eq!(categories, ["Food", "Shopping"]);
    }

    #[test]
    fn undecodable_lines_survive_a_delete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user-1.txt");
        std::fs::write(
            &path,
            b"Category,Amount,Date\n\
              Food,1,2024-01-01 08:00:00\n\
              Caf\xe9,2,2024-01-02 08:00:00\n\
              Bills,3,2024-01-03 08:00:00\n",
        )
        .unwrap();
        let store = FlatFileExpenses::new(dir.path());
        let ids = |store: &FlatFileExpenses| {
            store
                .list(1, &ExpenseFilter::default())
                .unwrap()
                .iter()
                .map(|e| e.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&store), [3, 1]);

        assert!(store.delete(1, 1).unwrap());
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"Category,Amount,Date\n\
              Caf\xe9,2,2024-01-02 08:00:00\n\
              Bills,3,2024-01-03 08:00:00\n"
        );
        assert_eq!(ids(&store), [2]);
    }

    #[test]
    fn filters_apply_to_file_records() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileExpenses::new(dir.path());
        store.append(1, &expense("Food", 1.0, at(2024, 1, 31), None)).unwrap();
        store.append(1, &expense("Bills", 2.0, at(2024, 2, 1), None)).unwrap();
        store.append(1, &expense("food court", 3.0, at(2024, 2, 15), None)).unwrap();

        let filter = ExpenseFilter {
            category: Some("Food".to_string()),
            start: NaiveDate::from_ymd_opt(2024, 2, 1),
            end: None,
        };
        let listed = store.list(1, &filter).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].amount, 3.0);
    }

    #[test]
    fn delete_and_clear_rewrite_the_file() {
        let dir = TempDir::new().unwrap();
        let store = FlatFileExpenses::new(dir.path());
        store.append(1, &expense("Food", 1.0, at(2024, 1, 1), None)).unwrap();
        store.append(1, &expense("Bills", 2.0, at(2024, 1, 2), None)).unwrap();
        store.append(2, &expense("Food", 9.0, at(2024, 1, 1), None)).unwrap();

        assert!(store.delete(1, 1).unwrap());
        assert!(!store.delete(1, 5).unwrap());
        let left = store.list(1, &ExpenseFilter::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].category, "Bills");
        assert_eq!(left[0].id, 1);

        assert_eq!(store.clear(1).unwrap(), 1);
        assert!(store.list(1, &ExpenseFilter::default()).unwrap().is_empty());
        assert_eq!(store.list(2, &ExpenseFilter::default()).unwrap().len(), 1);
        let raw = std::fs::read_to_string(dir.path().join("user-1.txt")).unwrap();
        assert_eq!(raw, "Category,Amount,Date\n");

        let mut names = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, ["user-1.txt", "user-2.txt"]);
    }
}
