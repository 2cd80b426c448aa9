//! Save and restore of the pending-event set.
//!
//! A [`Checkpoint`] lists every still-queued occurrence of every thread as
//! `(thread, time, kind, identifying fields)`, plus the watches that are
//! armed but have not fired. Objects are named by stable topology indices,
//! never by queue handles or pool keys, so a checkpoint taken from one
//! scheduler restores into any scheduler built from the same topology.
//!
//! Statement occurrences are not saved: their closures cannot be. Restoring
//! re-creates the queue items in saved order, which preserves same-time
//! ordering within a kind.

use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::context::{Shared, SolverSet, ThreadCore};
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventKind, SelfEvent};
use crate::ids::{ConnectionId, RecorderId, SourceId, TargetId, WatchId};

const HEADER: &str = "# NEUROSCHED CHECKPOINT v1";

// ── Records ───────────────────────────────────────────────────────────

/// Kind-specific identity of a saved occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SavedEvent {
    Connection { connection: ConnectionId },
    SelfEvent {
        target: TargetId,
        flag: f64,
        weights: Option<ConnectionId>,
        /// Whether this is the target's current movable occurrence.
        movable: bool,
    },
    Threshold { source: SourceId },
    Fanout { source: SourceId },
    Watch { watch: WatchId, flag: f64 },
    Barrier,
    PlayRecord { recorder: RecorderId, index: usize },
}

impl SavedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SavedEvent::Connection { .. } => EventKind::Connection,
            SavedEvent::SelfEvent { .. } => EventKind::SelfEvent,
            SavedEvent::Threshold { .. } => EventKind::Threshold,
            SavedEvent::Fanout { .. } => EventKind::Fanout,
            SavedEvent::Watch { .. } => EventKind::Watch,
            SavedEvent::Barrier => EventKind::Barrier,
            SavedEvent::PlayRecord { .. } => EventKind::PlayRecord,
        }
    }
}

/// One queued occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SavedItem {
    pub thread: usize,
    pub time: f64,
    pub event: SavedEvent,
}

/// An armed watch with no occurrence queued.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SavedWatch {
    pub watch: WatchId,
    pub flag: f64,
}

/// The pending-event set at `time`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Checkpoint {
    pub time: f64,
    pub items: Vec<SavedItem>,
    pub watches: Vec<SavedWatch>,
}

impl Checkpoint {
    /// `(kind, time)` of every item, sorted, for multiset comparison.
    pub fn signature(&self) -> Vec<(EventKind, f64)> {
        let mut sig: Vec<(EventKind, f64)> = self.items.iter().map(|i| (i.event.kind(), i.time)).collect();
        sig.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        sig
    }

    // ── Export / Import ───────────────────────────────────────────

    /// Write the checkpoint in its line-oriented text format.
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}", HEADER)?;
        writeln!(w, "# items: {}", self.items.len())?;
        writeln!(w, "T {}", self.time)?;
        for sw in &self.watches {
            writeln!(w, "W {} {}", sw.watch.raw(), sw.flag)?;
        }
        for item in &self.items {
            write!(w, "Q {} {} {}", item.thread, item.time, item.event.kind())?;
            match item.event {
                SavedEvent::Connection { connection } => write!(w, " {}", connection.raw())?,
                SavedEvent::SelfEvent {
                    target,
                    flag,
                    weights,
                    movable,
                } => {
                    let weights = weights.map_or_else(|| "-".to_string(), |c| c.raw().to_string());
                    write!(w, " {} {} {} {}", target.raw(), flag, weights, u8::from(movable))?;
                }
                SavedEvent::Threshold { source } | SavedEvent::Fanout { source } => write!(w, " {}", source.raw())?,
                SavedEvent::Watch { watch, flag } => write!(w, " {} {}", watch.raw(), flag)?,
                SavedEvent::Barrier => {}
                SavedEvent::PlayRecord { recorder, index } => write!(w, " {} {}", recorder.raw(), index)?,
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn export_to_file(&self, path: &str) -> io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        self.export(&mut f)
    }

    /// Parse the text format.
    pub fn import<R: BufRead>(r: R) -> SchedResult<Self> {
        let mut cp = Checkpoint::default();
        let mut saw_header = false;
        for (i, line) in r.lines().enumerate() {
            let lineno = i + 1;
            let line = line.map_err(|e| format_err(lineno, e.to_string()))?;
            let line = line.trim();
            if line == HEADER {
                saw_header = true;
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "T" => cp.time = parse(parts.get(1), "time").map_err(|e| format_err(lineno, e))?,
                "W" => {
                    let sw = SavedWatch {
                        watch: WatchId::new(parse(parts.get(1), "watch").map_err(|e| format_err(lineno, e))?),
                        flag: parse(parts.get(2), "flag").map_err(|e| format_err(lineno, e))?,
                    };
                    cp.watches.push(sw);
                }
                "Q" => cp.items.push(parse_item(&parts).map_err(|e| format_err(lineno, e))?),
                other => return Err(format_err(lineno, format!("unknown record '{}'", other))),
            }
        }
        if !saw_header {
            return Err(format_err(1, "missing header".into()));
        }
        Ok(cp)
    }

    pub fn import_from_file(path: &str) -> SchedResult<Self> {
        let f = std::fs::File::open(path).map_err(|e| format_err(0, e.to_string()))?;
        Self::import(io::BufReader::new(f))
    }
}

fn format_err(line: usize, reason: String) -> SchedError {
    SchedError::CheckpointFormat { line, reason }
}

fn parse<T: std::str::FromStr>(s: Option<&&str>, label: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    s.ok_or(format!("missing {}", label))?
        .parse()
        .map_err(|e| format!("{}: {}", label, e))
}

fn parse_item(parts: &[&str]) -> Result<SavedItem, String> {
    let thread: usize = parse(parts.get(1), "thread")?;
    let time: f64 = parse(parts.get(2), "time")?;
    let kind_name = parts.get(3).ok_or("missing kind")?;
    let kind = EventKind::from_name(kind_name).ok_or(format!("unknown kind '{}'", kind_name))?;
    let event = match kind {
        EventKind::Connection => SavedEvent::Connection {
            connection: ConnectionId::new(parse(parts.get(4), "connection")?),
        },
        EventKind::SelfEvent => {
            let weights = match parts.get(6) {
                Some(&"-") => None,
                other => Some(ConnectionId::new(parse(other, "weights")?)),
            };
            let movable: u8 = parse(parts.get(7), "movable")?;
            SavedEvent::SelfEvent {
                target: TargetId::new(parse(parts.get(4), "target")?),
                flag: parse(parts.get(5), "flag")?,
                weights,
                movable: movable != 0,
            }
        }
        EventKind::Threshold => SavedEvent::Threshold {
            source: SourceId::new(parse(parts.get(4), "source")?),
        },
        EventKind::Fanout => SavedEvent::Fanout {
            source: SourceId::new(parse(parts.get(4), "source")?),
        },
        EventKind::Watch => SavedEvent::Watch {
            watch: WatchId::new(parse(parts.get(4), "watch")?),
            flag: parse(parts.get(5), "flag")?,
        },
        EventKind::Barrier => SavedEvent::Barrier,
        EventKind::PlayRecord => SavedEvent::PlayRecord {
            recorder: RecorderId::new(parse(parts.get(4), "recorder")?),
            index: parse(parts.get(5), "index")?,
        },
        EventKind::Statement => return Err("statement occurrences are not restorable".into()),
    };
    Ok(SavedItem { thread, time, event })
}

// ── Save / restore on a thread ────────────────────────────────────────

impl ThreadCore {
    /// Append this thread's queue, in delivery order, and its armed watches.
    pub(crate) fn save_into(&self, cp: &mut Checkpoint) {
        for (_, time, event) in self.queue.iter_ordered() {
            let saved = match *event {
                Event::Connection(connection) => SavedEvent::Connection { connection },
                Event::SelfEvent(key) => {
                    let Some(se) = self.self_events.get(key) else { continue };
                    let movable = self.movable.get(&se.target).is_some_and(|(_, k)| *k == key);
                    SavedEvent::SelfEvent {
                        target: se.target,
                        flag: se.flag,
                        weights: se.weights,
                        movable,
                    }
                }
                Event::Threshold(source) => SavedEvent::Threshold { source },
                Event::Fanout(source) => SavedEvent::Fanout { source },
                Event::Watch(watch) => SavedEvent::Watch {
                    watch,
                    flag: self.watches.get(&watch).map_or(0.0, |ws| ws.flag),
                },
                Event::Barrier => SavedEvent::Barrier,
                Event::Statement(id) => {
                    debug!(thread = self.id, statement = %id, t = time, "statement not saved");
                    continue;
                }
                Event::PlayRecord(recorder) => SavedEvent::PlayRecord {
                    recorder,
                    index: self.recorders.get(&recorder).map_or(0, |r| r.index),
                },
            };
            cp.items.push(SavedItem {
                thread: self.id,
                time,
                event: saved,
            });
        }
        for (id, ws) in &self.watches {
            if ws.active && ws.cond.qthresh.is_none() {
                cp.watches.push(SavedWatch { watch: *id, flag: ws.flag });
            }
        }
    }

    /// Drop every pending occurrence and restart the clock at `t`.
    pub(crate) fn clear_for_restore(&mut self, t: f64, solvers: &SolverSet, shared: &Shared) {
        self.queue.clear();
        self.self_events.clear();
        self.movable.clear();
        self.pending_statements.clear();
        self.stop_stepping = false;
        self.awaiting = None;
        self.step_pending = false;
        self.t = t;
        if self.queue.has_bins() {
            self.queue.init_bins(self.dt, t - 0.5 * self.dt);
        }
        for ws in self.watches.values_mut() {
            ws.active = false;
            ws.cond.reset();
        }
        self.prime_sources(solvers, shared);
    }

    /// Re-arm a watch saved without a queued occurrence.
    pub(crate) fn restore_watch(
        &mut self,
        index: usize,
        sw: &SavedWatch,
        solvers: &SolverSet,
        shared: &Shared,
    ) -> SchedResult<()> {
        let value = crate::context::threshold::watch_value(sw.watch, solvers, shared);
        let (Some(value), Some(ws)) = (value, self.watches.get_mut(&sw.watch)) else {
            return Err(mismatch(index, format!("watch {} on thread {}", sw.watch, self.id)));
        };
        ws.cond.activate(value, self.weps);
        ws.cond.prime(value, self.t);
        ws.flag = sw.flag;
        ws.active = true;
        Ok(())
    }

    /// Re-create one saved occurrence on this thread.
    pub(crate) fn restore_item(&mut self, index: usize, item: &SavedItem, shared: &Shared) -> SchedResult<()> {
        let topo = &shared.topology;
        let me = self.id;
        let owns_target = |t: TargetId| topo.target_thread(t) == Some(me);
        match item.event {
            SavedEvent::Connection { connection } => {
                let ok = topo
                    .connection(connection)
                    .and_then(|c| c.target)
                    .is_some_and(|t| owns_target(t));
                if !ok {
                    return Err(mismatch(index, format!("connection {} into thread {}", connection, self.id)));
                }
                self.queue_event(item.time, Event::Connection(connection));
            }
            SavedEvent::SelfEvent {
                target,
                flag,
                weights,
                movable,
            } => {
                if !owns_target(target) {
                    return Err(mismatch(index, format!("target {} on thread {}", target, self.id)));
                }
                if weights.is_some_and(|c| topo.connection(c).is_none()) {
                    return Err(mismatch(index, format!("weights of target {}", target)));
                }
                let key = self.self_events.alloc(SelfEvent { target, flag, weights });
                let h = self.queue.insert(item.time, Event::SelfEvent(key));
                if movable {
                    self.movable.insert(target, (h, key));
                }
            }
            SavedEvent::Threshold { source } => {
                let Some(cond) = self.sources.get_mut(&source) else {
                    return Err(mismatch(index, format!("threshold source {} on thread {}", source, self.id)));
                };
                let h = self.queue.insert(item.time, Event::Threshold(source));
                cond.flag = true;
                cond.qthresh = Some(h);
            }
            SavedEvent::Fanout { source } => {
                if topo.source(source).map_or(true, |s| s.fanout_on(self.id).is_empty()) {
                    return Err(mismatch(index, format!("fan-out of {} on thread {}", source, self.id)));
                }
                self.queue_event(item.time, Event::Fanout(source));
            }
            SavedEvent::Watch { watch, flag } => {
                let Some(ws) = self.watches.get_mut(&watch) else {
                    return Err(mismatch(index, format!("watch {} on thread {}", watch, self.id)));
                };
                let h = self.queue.insert(item.time, Event::Watch(watch));
                ws.active = true;
                ws.flag = flag;
                ws.cond.flag = true;
                ws.cond.qthresh = Some(h);
            }
            SavedEvent::Barrier => {
                if shared.rendezvous.interval().is_none() {
                    return Err(mismatch(index, "a scheduler with barrier rounds".into()));
                }
                self.queue.insert(item.time, Event::Barrier);
            }
            SavedEvent::PlayRecord { recorder, index: next } => {
                let Some(rec) = self.recorders.get_mut(&recorder) else {
                    return Err(mismatch(index, format!("recorder {} on thread {}", recorder, self.id)));
                };
                rec.index = next;
                self.queue.insert(item.time, Event::PlayRecord(recorder));
            }
        }
        Ok(())
    }
}

fn mismatch(index: usize, expected: String) -> SchedError {
    SchedError::CheckpointMismatch { index, expected }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        Checkpoint {
            time: 12.5,
            items: vec![
                SavedItem {
                    thread: 0,
                    time: 13.0,
                    event: SavedEvent::Connection {
                        connection: ConnectionId::new(4),
                    },
                },
                SavedItem {
                    thread: 1,
                    time: 14.25,
                    event: SavedEvent::SelfEvent {
                        target: TargetId::new(2),
                        flag: 1.0,
                        weights: None,
                        movable: true,
                    },
                },
                SavedItem {
                    thread: 1,
                    time: 15.0,
                    event: SavedEvent::Barrier,
                },
                SavedItem {
                    thread: 0,
                    time: 16.0,
                    event: SavedEvent::PlayRecord {
                        recorder: RecorderId::new(0),
                        index: 3,
                    },
                },
            ],
            watches: vec![SavedWatch {
                watch: WatchId::new(1),
                flag: 2.0,
            }],
        }
    }

    #[test]
    fn test_text_export_import() {
        let cp = sample();
        let mut buf = Vec::new();
        cp.export(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(HEADER));
        assert!(text.contains("Q 1 14.25 self 2 1 - 1"));
        let back = Checkpoint::import(&buf[..]).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn test_import_rejects_garbage() {
        let text = format!("{}\nQ 0 1.0 bogus 3\n", HEADER);
        match Checkpoint::import(text.as_bytes()) {
            Err(SchedError::CheckpointFormat { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected format error, got {:?}", other),
        }
        assert!(Checkpoint::import("T 1.0\n".as_bytes()).is_err());
    }

    #[test]
    fn test_signature_is_sorted_by_kind_then_time() {
        let sig = sample().signature();
        let kinds: Vec<EventKind> = sig.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![EventKind::PlayRecord, EventKind::Connection, EventKind::SelfEvent, EventKind::Barrier]
        );
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn test_json_round_trip() {
        let cp = sample();
        let s = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&s).unwrap();
        assert_eq!(back, cp);
    }
}
