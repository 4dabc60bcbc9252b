use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single encoded event. A larger length prefix is garbage.
const MAX_ENTRY_BYTES: usize = 1 << 20;

/// Encode one event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Outcome of reading one entry from the log.
enum Decoded {
    Entry(Event, u64),
    /// Clean end of file on an entry boundary.
    End,
    /// The final entry is incomplete or fails its check. A crash mid-write
    /// leaves exactly this.
    Torn,
    /// A complete entry fails its check and more entries follow it.
    Corrupt(&'static str),
}

/// Decode the entry at the reader's position. `remaining` is the number of
/// file bytes from that position to EOF; it decides whether a bad entry is the
/// tail or sits in the middle of the log.
fn decode_next(reader: &mut impl Read, remaining: u64) -> io::Result<Decoded> {
    if remaining == 0 {
        return Ok(Decoded::End);
    }
    if remaining < 4 {
        return Ok(Decoded::Torn);
    }
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let size = len as u64 + 8;
    if size > remaining {
        return Ok(Decoded::Torn);
    }
    let is_tail = size == remaining;
    let bad = |reason| if is_tail { Decoded::Torn } else { Decoded::Corrupt(reason) };
    if len > MAX_ENTRY_BYTES {
        return Ok(bad("entry length out of range"));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf)?;
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(bad("checksum mismatch"));
    }
    Ok(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Decoded::Entry(event, size),
        Err(_) => bad("undecodable event"),
    })
}

/// Append-only write-ahead log of appointment events.
///
/// Entry layout: `[u32 LE: payload len][bincode Event][u32 LE: crc32 of payload]`.
/// A torn final entry left by a crash is dropped on replay. Damage anywhere
/// else fails the replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a full snapshot to `<path>.wal.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(path.with_extension("wal.tmp"))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every event from disk. A missing file is an empty log.
    ///
    /// A torn final entry is truncated so later appends stay readable. A bad
    /// entry with more data behind it is corruption: the file is left
    /// untouched and `InvalidData` is returned.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(&file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        loop {
            match decode_next(&mut reader, file_len - valid_len)? {
                Decoded::Entry(event, size) => {
                    events.push(event);
                    valid_len += size;
                }
                Decoded::End => break,
                Decoded::Torn => {
                    tracing::warn!(
                        path = %path.display(),
                        dropped = file_len - valid_len,
                        "truncating torn WAL tail"
                    );
                    drop(reader);
                    file.set_len(valid_len)?;
                    file.sync_all()?;
                    break;
                }
                Decoded::Corrupt(reason) => {
                    tracing::error!(
                        path = %path.display(),
                        offset = valid_len,
                        reason,
                        "corrupt WAL entry"
                    );
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "corrupt WAL entry at offset {valid_len} in {}: {reason}",
                            path.display()
                        ),
                    ));
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Appointment, AppointmentStatus};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("apptd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(location: &str, hour: u32) -> Event {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap();
        Event::AppointmentCreated {
            appointment: Appointment {
                appointment_id: Ulid::new(),
                location_id: location.into(),
                appointment_date_time: at,
                customer_name: "John Doe".into(),
                vehicle_details: "Subaru Outback".into(),
                services_list: vec!["Oil Change".into()],
                status: AppointmentStatus::Scheduled,
                created_at: at,
                updated_at: at,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let first = created("Loc-A", 14);
        let id = match &first {
            Event::AppointmentCreated { appointment } => appointment.appointment_id,
            _ => unreachable!(),
        };
        let events = vec![
            first,
            Event::AppointmentCancelled {
                id,
                at: Utc.with_ymd_and_hms(2026, 5, 30, 8, 0, 0).unwrap(),
            },
            Event::AppointmentDeleted { id },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = created("Loc-A", 15);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_after_torn_tail_survive_next_replay() {
        let path = tmp_path("torn_then_append.wal");
        let first = created("Loc-A", 15);
        let second = created("Loc-A", 16);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xff, 0xff, 0xff, 0x7f, 9]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first.clone()]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_truncates_bad_crc_tail() {
        let path = tmp_path("bad_crc.wal");
        let good = created("Loc-A", 10);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let payload = bincode::serialize(&Event::AppointmentDeleted { id: Ulid::new() }).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_entry_before_the_tail_fails_replay_and_keeps_the_file() {
        let path = tmp_path("corrupt_middle.wal");
        let events: Vec<Event> = (10..13).map(|h| created("Loc-A", h)).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let mut bytes = fs::read(&path).unwrap();
        let len_before = bytes.len();
        bytes[10] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("offset 0"), "{err}");
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert_eq!(bytes.len(), len_before);

        // Repairing the byte brings every committed entry back.
        bytes[10] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn garbage_length_before_the_tail_is_corruption() {
        let path = tmp_path("garbage_len_middle.wal");
        let first = created("Loc-A", 10);
        let second = created("Loc-A", 11);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.append(&second).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let first_len = bincode::serialize(&first).unwrap().len() as u32;
        assert_eq!(bytes[..4], first_len.to_le_bytes());
        // Shrink the first length prefix so the entry stays inside the file.
        bytes[..4].copy_from_slice(&(first_len - 1).to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(fs::read(&path).unwrap(), bytes);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_log_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let keep = created("Loc-A", 11);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            for hour in 12..18 {
                let churn = created("Loc-B", hour);
                let id = match &churn {
                    Event::AppointmentCreated { appointment } => appointment.appointment_id,
                    _ => unreachable!(),
                };
                wal.append(&churn).unwrap();
                wal.append(&Event::AppointmentDeleted { id }).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 13);
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = created("Loc-A", 16);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_visible_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (9..14).map(|h| created("Loc-C", h)).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
