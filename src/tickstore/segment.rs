use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::tick::Tick;
use crate::error::StoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Upper bound on one encoded tick; a larger length prefix is treated as a torn tail
const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Position of the segment currently being appended to
#[derive(Debug, Clone, Copy)]
struct SegmentCursor {
    index: u64,
    records: usize,
}

/// Per-symbol, per-day tick segments on local disk
///
/// Layout: `<root>/<symbol dir>/<YYYY-MM-DD>/seg_00000001.bin`, where the symbol directory
/// is the percent-encoded symbol (`EUR/USD` -> `EUR%2FUSD`). Each segment is a sequence of
/// length-prefixed (u32 LE) bincode records. A segment that reaches `max_records` is
/// closed and the next index is started; reading a day concatenates its segments in
/// index order, so arrival order is preserved.
pub struct SegmentStore {
    root: PathBuf,
    max_records: usize,
    /// Keyed by symbol directory name
    cursors: Mutex<HashMap<(String, NaiveDate), SegmentCursor>>,
}

impl SegmentStore {
    pub fn open(root: impl AsRef<Path>, max_records: usize) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            max_records: max_records.max(1),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Append ticks for one (symbol, day) in the given order
    ///
    /// All-or-nothing: on failure every touched segment is truncated back to its
    /// previous length, so the caller can retry the whole group.
    pub fn append(&self, symbol: &str, date: NaiveDate, ticks: &[Tick]) -> Result<usize, StoreError> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let dir_name = symbol_dir_name(symbol)?;
        let dir = self.root.join(&dir_name).join(date.format(DATE_FORMAT).to_string());
        let key = (dir_name, date);

        let start = match self.cursors.lock().get(&key).copied() {
            Some(cursor) => cursor,
            None => Self::discover_cursor(&dir).map_err(|e| write_error(symbol, date, e))?,
        };

        let mut touched: Vec<(PathBuf, u64)> = Vec::new();
        match self.write_records(&dir, start, ticks, &mut touched) {
            Ok(end) => {
                self.cursors.lock().insert(key, end);
                Ok(ticks.len())
            }
            Err(e) => {
                for (path, len) in &touched {
                    if let Err(rollback) = truncate_to(path, *len) {
                        tracing::error!("❌ Failed to roll back {}: {}", path.display(), rollback);
                    }
                }
                self.cursors.lock().remove(&key);
                Err(write_error(symbol, date, e))
            }
        }
    }

    fn write_records(
        &self,
        dir: &Path,
        mut cursor: SegmentCursor,
        ticks: &[Tick],
        touched: &mut Vec<(PathBuf, u64)>,
    ) -> io::Result<SegmentCursor> {
        std::fs::create_dir_all(dir)?;

        let mut writer: Option<BufWriter<File>> = None;

        for tick in ticks {
            if cursor.records >= self.max_records {
                if let Some(mut w) = writer.take() {
                    w.flush()?;
                    w.get_ref().sync_data()?;
                }
                cursor.index += 1;
                cursor.records = 0;
                tracing::info!(
                    "🔁 Rotating segment for {} to seg_{:08}",
                    tick.symbol(),
                    cursor.index
                );
            }

            if writer.is_none() {
                let path = dir.join(segment_file_name(cursor.index));
                let existing = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                touched.push((path.clone(), existing));
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                writer = Some(BufWriter::new(file));
            }

            if let Some(w) = writer.as_mut() {
                let encoded = bincode::serialize(tick)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let len = encoded.len() as u32;
                w.write_all(&len.to_le_bytes())?;
                w.write_all(&encoded)?;
            }
            cursor.records += 1;
        }

        if let Some(mut w) = writer {
            w.flush()?;
            w.get_ref().sync_data()?;
        }

        Ok(cursor)
    }

    /// Find the latest segment in a day directory and count its records
    fn discover_cursor(dir: &Path) -> io::Result<SegmentCursor> {
        let indices = segment_indices(dir)?;
        match indices.last() {
            Some(&index) => {
                let path = dir.join(segment_file_name(index));
                let mut records = 0;
                read_segment(&path, |_| records += 1)?;
                Ok(SegmentCursor { index, records })
            }
            None => Ok(SegmentCursor {
                index: 1,
                records: 0,
            }),
        }
    }

    /// Every stored tick for a symbol on one day, in arrival order
    pub fn read_day(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Tick>, StoreError> {
        let dir = self.day_dir(symbol, date)?;
        let mut ticks = Vec::new();

        for index in segment_indices(&dir)? {
            read_segment(&dir.join(segment_file_name(index)), |tick| ticks.push(tick))?;
        }

        Ok(ticks)
    }

    /// Most recent `limit` ticks stored between `from` and `to` (inclusive days)
    pub fn read_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<Tick>, StoreError> {
        let mut ticks = Vec::new();
        for date in self.available_dates(symbol)? {
            if date >= from && date <= to {
                ticks.extend(self.read_day(symbol, date)?);
            }
        }

        let skip = ticks.len().saturating_sub(limit);
        Ok(ticks.split_off(skip))
    }

    pub fn available_dates(&self, symbol: &str) -> Result<Vec<NaiveDate>, StoreError> {
        let dir = self.root.join(symbol_dir_name(symbol)?);
        let mut dates = list_dates(&dir)?;
        dates.sort();
        Ok(dates)
    }

    /// Stored symbols, decoded from their directory names
    pub fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols: Vec<String> = self
            .symbol_dirs()?
            .iter()
            .filter_map(|name| decode_symbol_dir(name))
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    fn symbol_dirs(&self) -> io::Result<Vec<String>> {
        Ok(std::fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect())
    }

    /// Remove day directories older than `retention_days` before `today`
    pub fn cleanup_older_than(&self, retention_days: u32, today: NaiveDate) -> Result<usize, StoreError> {
        let cutoff = today - chrono::Duration::days(i64::from(retention_days));
        let mut removed = 0;

        for dir_name in self.symbol_dirs()? {
            let symbol_dir = self.root.join(&dir_name);
            for date in list_dates(&symbol_dir)? {
                if date < cutoff {
                    std::fs::remove_dir_all(symbol_dir.join(date.format(DATE_FORMAT).to_string()))?;
                    self.cursors.lock().remove(&(dir_name.clone(), date));
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!("🧹 Removed {} day directories older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    fn day_dir(&self, symbol: &str, date: NaiveDate) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(symbol_dir_name(symbol)?)
            .join(date.format(DATE_FORMAT).to_string()))
    }
}

fn write_error(symbol: &str, date: NaiveDate, source: io::Error) -> StoreError {
    StoreError::PersistenceWrite {
        symbol: symbol.to_string(),
        date: date.format(DATE_FORMAT).to_string(),
        source,
    }
}

fn segment_file_name(index: u64) -> String {
    format!("seg_{:08}.bin", index)
}

/// Percent-encode a symbol into one path component
///
/// Only `[A-Za-z0-9_-]` pass through, so distinct symbols never share a directory and the
/// result can never be `.`, `..` or contain a separator.
fn symbol_dir_name(symbol: &str) -> Result<String, StoreError> {
    if symbol.is_empty() {
        return Err(StoreError::InvalidSymbol(symbol.to_string()));
    }

    let mut name = String::with_capacity(symbol.len());
    for byte in symbol.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    Ok(name)
}

fn decode_symbol_dir(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok().filter(|s| !s.is_empty())
}

fn segment_indices(dir: &Path) -> io::Result<Vec<u64>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut indices: Vec<u64> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|name| name.starts_with("seg_") && name.ends_with(".bin") && name.len() == 16)
        .filter_map(|name| name[4..12].parse::<u64>().ok())
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

fn list_dates(symbol_dir: &Path) -> io::Result<Vec<NaiveDate>> {
    let entries = match std::fs::read_dir(symbol_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter_map(|name| NaiveDate::parse_from_str(&name, DATE_FORMAT).ok())
        .collect())
}

/// Stream records from one segment; a torn trailing record ends the read
fn read_segment<F>(path: &Path, mut handler: F) -> io::Result<u64>
where
    F: FnMut(Tick),
{
    let file = File::open(path)?;
    let mut remaining = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut count = 0;

    loop {
        // Read length prefix
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        remaining = remaining.saturating_sub(4);

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_BYTES || len as u64 > remaining {
            tracing::warn!(
                "⚠️  Truncated record at end of {} ({} byte length prefix, {} bytes left)",
                path.display(),
                len,
                remaining
            );
            break;
        }
        remaining -= len as u64;

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        match bincode::deserialize::<Tick>(&data) {
            Ok(tick) => {
                handler(tick);
                count += 1;
            }
            Err(e) => {
                tracing::warn!("⚠️  Skipping unreadable record in {}: {}", path.display(), e);
            }
        }
    }

    Ok(count)
}

fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
    if len == 0 {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    } else {
        OpenOptions::new().write(true).open(path)?.set_len(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn tick(symbol: &str, n: i64) -> Tick {
        let ts = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(n);
        let bid = Decimal::new(108_500 + n, 5);
        Tick::new("fix", symbol, bid, bid + Decimal::new(20, 5), "lp-a", ts).unwrap()
    }

    #[test]
    fn test_store_create() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path().join("ticks"), 100);
        assert!(store.is_ok());
    }

    #[test]
    fn test_round_trip_preserves_order_and_values() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 1000).unwrap();

        let ticks: Vec<Tick> = (0..25).map(|n| tick("EURUSD", n)).collect();
        store.append("EURUSD", day(), &ticks[..10]).unwrap();
        store.append("EURUSD", day(), &ticks[10..]).unwrap();

        let back = store.read_day("EURUSD", day()).unwrap();
        assert_eq!(back, ticks);
        assert_eq!(back[7].bid().to_string(), ticks[7].bid().to_string());
    }

    #[test]
    fn test_rotation_at_max_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 4).unwrap();

        let ticks: Vec<Tick> = (0..10).map(|n| tick("EURUSD", n)).collect();
        store.append("EURUSD", day(), &ticks[..3]).unwrap();
        store.append("EURUSD", day(), &ticks[3..]).unwrap();

        let dir = temp_dir.path().join("EURUSD").join("2024-06-03");
        assert_eq!(segment_indices(&dir).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.read_day("EURUSD", day()).unwrap(), ticks);
    }

    #[test]
    fn test_reopen_continues_latest_segment() {
        let temp_dir = TempDir::new().unwrap();
        let ticks: Vec<Tick> = (0..6).map(|n| tick("EURUSD", n)).collect();

        {
            let store = SegmentStore::open(temp_dir.path(), 4).unwrap();
            store.append("EURUSD", day(), &ticks[..3]).unwrap();
        }

        let store = SegmentStore::open(temp_dir.path(), 4).unwrap();
        store.append("EURUSD", day(), &ticks[3..]).unwrap();

        let dir = temp_dir.path().join("EURUSD").join("2024-06-03");
        assert_eq!(segment_indices(&dir).unwrap(), vec![1, 2]);
        assert_eq!(store.read_day("EURUSD", day()).unwrap(), ticks);
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 100).unwrap();
        let ticks: Vec<Tick> = (0..3).map(|n| tick("EURUSD", n)).collect();
        store.append("EURUSD", day(), &ticks).unwrap();

        let path = temp_dir
            .path()
            .join("EURUSD")
            .join("2024-06-03")
            .join(segment_file_name(1));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&200u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        assert_eq!(store.read_day("EURUSD", day()).unwrap(), ticks);
    }

    #[test]
    fn test_dates_range_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 100).unwrap();

        let d1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        store.append("EUR/USD", d1, &[tick("EUR/USD", 1)]).unwrap();
        store.append("EUR/USD", d2, &[tick("EUR/USD", 2), tick("EUR/USD", 3)]).unwrap();

        assert_eq!(store.available_dates("EUR/USD").unwrap(), vec![d1, d2]);
        assert_eq!(store.symbols().unwrap(), vec!["EUR/USD"]);

        let last_two = store.read_range("EUR/USD", d1, d2, 2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].bid(), tick("EUR/USD", 3).bid());

        let removed = store
            .cleanup_older_than(1, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.available_dates("EUR/USD").unwrap(), vec![d2]);
    }

    #[test]
    fn test_similar_symbols_keep_separate_segments() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 4).unwrap();

        let slash: Vec<Tick> = (0..4).map(|n| tick("EUR/USD", n)).collect();
        let underscore: Vec<Tick> = (10..13).map(|n| tick("EUR_USD", n)).collect();
        store.append("EUR/USD", day(), &slash[..3]).unwrap();
        store.append("EUR_USD", day(), &underscore).unwrap();
        store.append("EUR/USD", day(), &slash[3..]).unwrap();

        assert_eq!(store.read_day("EUR/USD", day()).unwrap(), slash);
        assert_eq!(store.read_day("EUR_USD", day()).unwrap(), underscore);

        let slash_dir = temp_dir.path().join("EUR%2FUSD").join("2024-06-03");
        let underscore_dir = temp_dir.path().join("EUR_USD").join("2024-06-03");
        assert_eq!(segment_indices(&slash_dir).unwrap(), vec![1]);
        assert_eq!(segment_indices(&underscore_dir).unwrap(), vec![1]);
        assert_eq!(store.symbols().unwrap(), vec!["EUR/USD", "EUR_USD"]);
    }

    #[test]
    fn test_dot_symbols_stay_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("ticks");
        let store = SegmentStore::open(&root, 100).unwrap();

        // A day directory next to the root must not be reachable
        std::fs::create_dir_all(temp_dir.path().join("2024-06-03")).unwrap();
        assert!(store.available_dates("..").unwrap().is_empty());
        assert!(store.read_day("..", day()).unwrap().is_empty());

        store.append("..", day(), &[tick("..", 1)]).unwrap();
        assert!(root.join("%2E%2E").join("2024-06-03").is_dir());
        assert_eq!(store.read_day("..", day()).unwrap(), vec![tick("..", 1)]);

        assert!(matches!(
            store.available_dates(""),
            Err(StoreError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn test_symbol_dir_names_decode_back() {
        for symbol in ["EURUSD", "EUR/USD", "BRK.B", "..", "100%", "ÉTÉ"] {
            let name = symbol_dir_name(symbol).unwrap();
            assert!(!name.contains('/') && !name.contains('.'));
            assert_eq!(decode_symbol_dir(&name).as_deref(), Some(symbol));
        }
        assert_eq!(decode_symbol_dir("bad%2"), None);
    }

    #[test]
    fn test_oversized_length_prefix_is_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 100).unwrap();
        let ticks: Vec<Tick> = (0..2).map(|n| tick("EURUSD", n)).collect();
        store.append("EURUSD", day(), &ticks).unwrap();

        let path = temp_dir
            .path()
            .join("EURUSD")
            .join("2024-06-03")
            .join(segment_file_name(1));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 16]).unwrap();

        assert_eq!(store.read_day("EURUSD", day()).unwrap(), ticks);
    }

    #[test]
    fn test_missing_day_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = SegmentStore::open(temp_dir.path(), 100).unwrap();
        assert!(store.read_day("USDJPY", day()).unwrap().is_empty());
        assert!(store.available_dates("USDJPY").unwrap().is_empty());
    }
}
