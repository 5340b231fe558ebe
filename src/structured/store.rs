//! Staging layer for structured mutations.
//!
//! Mutations never touch the live tables directly: `stage_upsert` and
//! `stage_remove` apply to a shadow copy, `commit_staged` atomically
//! swaps it in (the caller publishes the new `Arc`), `rollback_staged`
//! discards it. Pending mutations are also what goes into WAL
//! `structured_mutation` records.

use std::sync::Arc;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, WaxError};

use super::{
    AsOf, EntityKey, Evidence, FactRow, FactValue, Span, StructuredTables,
};

// ── Mutations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FactUpsert {
    pub subject: EntityKey,
    pub predicate: String,
    pub object: FactValue,
    pub valid_from_ms: i64,
    pub valid_to_ms: Option<i64>,
    pub asserted_at_ms: i64,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactRemove {
    pub subject: EntityKey,
    pub predicate: String,
    pub asserted_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredMutation {
    Upsert(FactUpsert),
    Remove(FactRemove),
}

impl StructuredMutation {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        match self {
            StructuredMutation::Upsert(up) => {
                w.put_u8(0);
                w.put_str(&up.subject.key);
                w.put_str(&up.subject.kind);
                w.put_str(&up.predicate);
                encode_fact_value(&mut w, &up.object)?;
                w.put_i64(up.valid_from_ms);
                match up.valid_to_ms {
                    Some(to) => {
                        w.put_u8(1);
                        w.put_i64(to);
                    }
                    None => w.put_u8(0),
                }
                w.put_i64(up.asserted_at_ms);
                w.put_u32(up.evidence.len() as u32);
                for ev in &up.evidence {
                    encode_evidence(&mut w, ev)?;
                }
            }
            StructuredMutation::Remove(rm) => {
                w.put_u8(1);
                w.put_str(&rm.subject.key);
                w.put_str(&rm.subject.kind);
                w.put_str(&rm.predicate);
                w.put_i64(rm.asserted_at_ms);
            }
        }
        Ok(w.into_bytes())
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let mutation = match r.read_u8()? {
            0 => {
                let subject = EntityKey::new(r.read_str()?, r.read_str()?);
                let predicate = r.read_str()?;
                let object = decode_fact_value(&mut r)?;
                let valid_from_ms = r.read_i64()?;
                let valid_to_ms = if r.read_u8()? == 1 {
                    Some(r.read_i64()?)
                } else {
                    None
                };
                let asserted_at_ms = r.read_i64()?;
                let evidence_count = r.read_u32()?;
                let mut evidence = Vec::with_capacity(evidence_count as usize);
                for _ in 0..evidence_count {
                    evidence.push(decode_evidence(&mut r)?);
                }
                StructuredMutation::Upsert(FactUpsert {
                    subject,
                    predicate,
                    object,
                    valid_from_ms,
                    valid_to_ms,
                    asserted_at_ms,
                    evidence,
                })
            }
            1 => StructuredMutation::Remove(FactRemove {
                subject: EntityKey::new(r.read_str()?, r.read_str()?),
                predicate: r.read_str()?,
                asserted_at_ms: r.read_i64()?,
            }),
            tag => {
                return Err(WaxError::Encoding(format!(
                    "unknown structured mutation tag {tag}"
                )))
            }
        };
        r.finish()?;
        Ok(mutation)
    }
}

fn encode_fact_value(w: &mut ByteWriter, value: &FactValue) -> Result<()> {
    match value {
        FactValue::Str(s) => {
            w.put_u8(0);
            w.put_str(s);
        }
        FactValue::I64(v) => {
            w.put_u8(1);
            w.put_i64(*v);
        }
        FactValue::F64(v) => {
            w.put_u8(2);
            w.put_f64(*v)?;
        }
        FactValue::Bool(v) => {
            w.put_u8(3);
            w.put_u8(u8::from(*v));
        }
        FactValue::Bytes(b) => {
            w.put_u8(4);
            w.put_bytes(b);
        }
        FactValue::TimeMs(v) => {
            w.put_u8(5);
            w.put_i64(*v);
        }
        FactValue::EntityRef(key) => {
            w.put_u8(6);
            w.put_str(&key.key);
            w.put_str(&key.kind);
        }
    }
    Ok(())
}

fn decode_fact_value(r: &mut ByteReader<'_>) -> Result<FactValue> {
    Ok(match r.read_u8()? {
        0 => FactValue::Str(r.read_str()?),
        1 => FactValue::I64(r.read_i64()?),
        2 => FactValue::F64(r.read_f64()?),
        3 => FactValue::Bool(r.read_u8()? != 0),
        4 => FactValue::Bytes(r.read_bytes()?),
        5 => FactValue::TimeMs(r.read_i64()?),
        6 => FactValue::EntityRef(EntityKey::new(r.read_str()?, r.read_str()?)),
        tag => {
            return Err(WaxError::Encoding(format!(
                "unknown fact value tag {tag}"
            )))
        }
    })
}

fn encode_evidence(w: &mut ByteWriter, ev: &Evidence) -> Result<()> {
    w.put_u64(ev.source_frame_id);
    match ev.chunk_index {
        Some(i) => {
            w.put_u8(1);
            w.put_u32(i);
        }
        None => w.put_u8(0),
    }
    match ev.utf8_span {
        Some((start, end)) => {
            w.put_u8(1);
            w.put_u32(start);
            w.put_u32(end);
        }
        None => w.put_u8(0),
    }
    w.put_str(&ev.extractor_id);
    w.put_str(&ev.extractor_version);
    match ev.confidence {
        Some(c) => {
            w.put_u8(1);
            w.put_f64(c)?;
        }
        None => w.put_u8(0),
    }
    w.put_i64(ev.asserted_at_ms);
    Ok(())
}

fn decode_evidence(r: &mut ByteReader<'_>) -> Result<Evidence> {
    let source_frame_id = r.read_u64()?;
    let chunk_index = if r.read_u8()? == 1 {
        Some(r.read_u32()?)
    } else {
        None
    };
    let utf8_span = if r.read_u8()? == 1 {
        Some((r.read_u32()?, r.read_u32()?))
    } else {
        None
    };
    let extractor_id = r.read_str()?;
    let extractor_version = r.read_str()?;
    let confidence = if r.read_u8()? == 1 {
        Some(r.read_f64()?)
    } else {
        None
    };
    let asserted_at_ms = r.read_i64()?;
    Ok(Evidence {
        source_frame_id,
        chunk_index,
        utf8_span,
        extractor_id,
        extractor_version,
        confidence,
        asserted_at_ms,
    })
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct StructuredStore {
    live: Arc<StructuredTables>,
    shadow: Option<StructuredTables>,
    pending: Vec<StructuredMutation>,
}

impl StructuredStore {
    pub fn new(tables: StructuredTables) -> Self {
        Self {
            live: Arc::new(tables),
            shadow: None,
            pending: Vec::new(),
        }
    }

    pub fn live(&self) -> Arc<StructuredTables> {
        Arc::clone(&self.live)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether a shadow copy exists (staged mutations or a staged
    /// wholesale snapshot).
    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    /// Stage a wholesale replacement of the tables, e.g. during
    /// compaction into a fresh file.
    pub fn stage_snapshot(&mut self, tables: StructuredTables) {
        self.shadow = Some(tables);
    }

    fn shadow_mut(&mut self) -> &mut StructuredTables {
        if self.shadow.is_none() {
            self.shadow = Some((*self.live).clone());
        }
        self.shadow.as_mut().expect("shadow just ensured")
    }

    /// Stage one upsert. Returns the fact row id it lands on.
    pub fn stage_upsert(&mut self, upsert: FactUpsert) -> Result<u64> {
        let shadow = self.shadow_mut();
        let row_id = apply_upsert(shadow, &upsert)?;
        self.pending.push(StructuredMutation::Upsert(upsert));
        Ok(row_id)
    }

    /// Stage a removal: bi-temporally closes the current fact for the
    /// (subject, predicate) pair. Returns whether anything closed.
    pub fn stage_remove(&mut self, remove: FactRemove) -> Result<bool> {
        let shadow = self.shadow_mut();
        let closed = apply_remove(shadow, &remove);
        if closed {
            self.pending.push(StructuredMutation::Remove(remove));
        }
        Ok(closed)
    }

    /// Re-apply a mutation recovered from the WAL.
    pub fn stage_replayed(&mut self, mutation: StructuredMutation) -> Result<()> {
        match mutation {
            StructuredMutation::Upsert(up) => {
                self.stage_upsert(up)?;
            }
            StructuredMutation::Remove(rm) => {
                self.stage_remove(rm)?;
            }
        }
        Ok(())
    }

    /// The staged view if one exists, else the live tables. Writers use
    /// this to answer queries that must see their own staged rows.
    pub fn staged_view(&self) -> &StructuredTables {
        match &self.shadow {
            Some(shadow) => shadow,
            None => self.live.as_ref(),
        }
    }

    /// Swap the shadow in as the live map and drain the pending
    /// mutations for the commit pipeline.
    pub fn commit_staged(&mut self) -> (Arc<StructuredTables>, Vec<StructuredMutation>) {
        if let Some(shadow) = self.shadow.take() {
            self.live = Arc::new(shadow);
        }
        (Arc::clone(&self.live), std::mem::take(&mut self.pending))
    }

    /// Discard the shadow and all pending mutations.
    pub fn rollback_staged(&mut self) {
        self.shadow = None;
        self.pending.clear();
    }

    /// Replace the live tables wholesale (snapshot load, compaction).
    pub fn reset_live(&mut self, tables: StructuredTables) {
        self.live = Arc::new(tables);
        self.shadow = None;
        self.pending.clear();
    }
}

/// Locate the current fact row (one with a fully-open span) for a
/// (subject, predicate) pair.
fn current_fact(tables: &StructuredTables, subject_row: u64, predicate_row: u64) -> Option<u64> {
    tables
        .facts_for_subject(subject_row)
        .iter()
        .copied()
        .find(|&row_id| {
            let fact = &tables.facts[row_id as usize - 1];
            fact.predicate_row == predicate_row && fact.open_span_index().is_some()
        })
}

/// Conflict resolution on upsert:
/// - same identity as the current value: evidence is appended; a
///   changed valid window closes the open span at `asserted_at_ms` and
///   opens a new one;
/// - different value: the current fact is superseded — its open span is
///   system-closed at `asserted_at_ms` and replaced by a valid-closed
///   successor span — and the new value gets its own row (or reopens a
///   previously closed row with the same identity).
fn apply_upsert(tables: &mut StructuredTables, upsert: &FactUpsert) -> Result<u64> {
    let subject_row = tables.intern_entity(&upsert.subject);
    let predicate_row = tables.intern_predicate(&upsert.predicate);
    let object = tables.resolve_value(&upsert.object)?;
    let identity = tables.identity_hash(subject_row, predicate_row, &object);
    let asserted = upsert.asserted_at_ms;

    if let Some(current_row) = current_fact(tables, subject_row, predicate_row) {
        let same_identity = tables.facts[current_row as usize - 1].identity_hash == identity;
        if same_identity {
            let fact = &mut tables.facts[current_row as usize - 1];
            let open_idx = fact.open_span_index().expect("current fact has open span");
            if fact.spans[open_idx].valid_from_ms != upsert.valid_from_ms
                || fact.spans[open_idx].valid_to_ms != upsert.valid_to_ms
            {
                fact.spans[open_idx].system_to_ms = Some(asserted);
                fact.spans
                    .push(Span::open(upsert.valid_from_ms, upsert.valid_to_ms, asserted));
            }
            fact.evidence.extend(upsert.evidence.iter().cloned());
            return Ok(current_row);
        }

        // Supersede: the old value stops being current. System time
        // records when we learned this; valid time ends where the new
        // value begins.
        let fact = &mut tables.facts[current_row as usize - 1];
        let open_idx = fact.open_span_index().expect("current fact has open span");
        let old_open = fact.spans[open_idx];
        fact.spans[open_idx].system_to_ms = Some(asserted);
        fact.spans.push(Span {
            valid_from_ms: old_open.valid_from_ms,
            valid_to_ms: Some(upsert.valid_from_ms),
            system_from_ms: asserted,
            system_to_ms: None,
        });
    }

    if let Some(existing_row) = tables.lookup_identity(&identity) {
        // The same triple existed before and was closed: reopen it.
        let fact = &mut tables.facts[existing_row as usize - 1];
        fact.spans
            .push(Span::open(upsert.valid_from_ms, upsert.valid_to_ms, asserted));
        fact.evidence.extend(upsert.evidence.iter().cloned());
        return Ok(existing_row);
    }

    let row_id = tables.next_fact_row();
    tables.facts.push(FactRow {
        row_id,
        subject_row,
        predicate_row,
        object,
        identity_hash: identity,
        spans: vec![Span::open(upsert.valid_from_ms, upsert.valid_to_ms, asserted)],
        evidence: upsert.evidence.clone(),
    });
    tables.register_fact(row_id);
    Ok(row_id)
}

fn apply_remove(tables: &mut StructuredTables, remove: &FactRemove) -> bool {
    let Some(subject_row) = tables.lookup_entity(&remove.subject) else {
        return false;
    };
    let Some(predicate_row) = tables.lookup_predicate(&remove.predicate) else {
        return false;
    };
    let Some(current_row) = current_fact(tables, subject_row, predicate_row) else {
        return false;
    };

    let asserted = remove.asserted_at_ms;
    let fact = &mut tables.facts[current_row as usize - 1];
    let open_idx = fact.open_span_index().expect("current fact has open span");
    let old_open = fact.spans[open_idx];
    fact.spans[open_idx].system_to_ms = Some(asserted);
    fact.spans.push(Span {
        valid_from_ms: old_open.valid_from_ms,
        valid_to_ms: Some(asserted),
        system_from_ms: asserted,
        system_to_ms: None,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(subject: &str, predicate: &str, value: &str, at: i64) -> FactUpsert {
        FactUpsert {
            subject: EntityKey::new(subject, "person"),
            predicate: predicate.into(),
            object: FactValue::Str(value.into()),
            valid_from_ms: at,
            valid_to_ms: None,
            asserted_at_ms: at,
            evidence: vec![Evidence {
                source_frame_id: 1,
                chunk_index: None,
                utf8_span: None,
                extractor_id: "test".into(),
                extractor_version: "1".into(),
                confidence: None,
                asserted_at_ms: at,
            }],
        }
    }

    fn value_of(view: &super::super::FactView) -> String {
        match &view.object {
            FactValue::Str(s) => s.clone(),
            other => panic!("unexpected object {other:?}"),
        }
    }

    #[test]
    fn test_bitemporal_supersede() {
        // Employer changes from Acme (asserted 100) to Globex (200).
        let mut store = StructuredStore::default();
        store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        store.stage_upsert(upsert("alice", "employer", "Globex", 200)).unwrap();
        let (tables, _) = store.commit_staged();

        let subject = EntityKey::new("alice", "person");

        let at_150 = tables.get_facts(Some(&subject), Some("employer"), AsOf::valid(150));
        assert_eq!(at_150.len(), 1);
        assert_eq!(value_of(&at_150[0]), "Acme");

        let at_250 = tables.get_facts(Some(&subject), Some("employer"), AsOf::valid(250));
        assert_eq!(at_250.len(), 1);
        assert_eq!(value_of(&at_250[0]), "Globex");

        // System time travel: what did we believe at system time 150?
        let time_travel = tables.get_facts(Some(&subject), Some("employer"), AsOf::at(250, 150));
        assert_eq!(time_travel.len(), 1);
        assert_eq!(value_of(&time_travel[0]), "Acme");
    }

    #[test]
    fn test_same_value_appends_evidence_without_new_span() {
        let mut store = StructuredStore::default();
        let row_a = store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        let row_b = store.stage_upsert(upsert("alice", "employer", "Acme", 150)).unwrap();
        assert_eq!(row_a, row_b);

        let (tables, _) = store.commit_staged();
        let fact = &tables.facts[row_a as usize - 1];
        assert_eq!(fact.spans.len(), 1, "no new span for an unchanged value");
        assert_eq!(fact.evidence.len(), 2, "evidence accumulates");
    }

    #[test]
    fn test_changed_valid_window_reopens_span() {
        let mut store = StructuredStore::default();
        let mut first = upsert("alice", "employer", "Acme", 100);
        first.valid_from_ms = 100;
        let row = store.stage_upsert(first).unwrap();

        let mut second = upsert("alice", "employer", "Acme", 200);
        second.valid_from_ms = 50; // backdated correction
        store.stage_upsert(second).unwrap();

        let (tables, _) = store.commit_staged();
        let fact = &tables.facts[row as usize - 1];
        assert_eq!(fact.spans.len(), 2);
        // The correction is only visible from system time 200 onward.
        let subject = EntityKey::new("alice", "person");
        let before = tables.get_facts(Some(&subject), None, AsOf::at(75, 150));
        assert!(before.is_empty());
        let after = tables.get_facts(Some(&subject), None, AsOf::at(75, 250));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_remove_closes_current() {
        let mut store = StructuredStore::default();
        store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        let closed = store
            .stage_remove(FactRemove {
                subject: EntityKey::new("alice", "person"),
                predicate: "employer".into(),
                asserted_at_ms: 300,
            })
            .unwrap();
        assert!(closed);

        let (tables, _) = store.commit_staged();
        let subject = EntityKey::new("alice", "person");
        // Current view: nothing.
        assert!(tables
            .get_facts(Some(&subject), None, AsOf::LATEST)
            .is_empty());
        // Still valid within the closed window.
        let historical = tables.get_facts(Some(&subject), None, AsOf::valid(200));
        assert_eq!(historical.len(), 1);
        // System time travel to before the removal still sees it current.
        let believed = tables.get_facts(Some(&subject), None, AsOf::at(400, 200));
        assert_eq!(believed.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut store = StructuredStore::default();
        let closed = store
            .stage_remove(FactRemove {
                subject: EntityKey::new("ghost", "person"),
                predicate: "employer".into(),
                asserted_at_ms: 10,
            })
            .unwrap();
        assert!(!closed);
        assert!(!store.has_pending());
    }

    #[test]
    fn test_rollback_discards_shadow() {
        let mut store = StructuredStore::default();
        store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        assert!(store.has_pending());
        store.rollback_staged();
        assert!(!store.has_pending());

        let (tables, mutations) = store.commit_staged();
        assert_eq!(tables.fact_count(), 0);
        assert!(mutations.is_empty());
    }

    #[test]
    fn test_live_is_immutable_until_commit() {
        let mut store = StructuredStore::default();
        let live_before = store.live();
        store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        assert_eq!(live_before.fact_count(), 0);
        assert_eq!(store.live().fact_count(), 0, "live map unchanged before commit");
        assert_eq!(store.staged_view().fact_count(), 1, "staged view sees the row");

        let (tables, mutations) = store.commit_staged();
        assert_eq!(tables.fact_count(), 1);
        assert_eq!(mutations.len(), 1);
    }

    #[test]
    fn test_reassert_after_remove_reopens_row() {
        let mut store = StructuredStore::default();
        let row = store.stage_upsert(upsert("alice", "employer", "Acme", 100)).unwrap();
        store
            .stage_remove(FactRemove {
                subject: EntityKey::new("alice", "person"),
                predicate: "employer".into(),
                asserted_at_ms: 200,
            })
            .unwrap();
        let row_again = store.stage_upsert(upsert("alice", "employer", "Acme", 300)).unwrap();
        assert_eq!(row, row_again, "identity maps back to the same row");

        let (tables, _) = store.commit_staged();
        let current = tables.get_facts(None, None, AsOf::LATEST);
        assert_eq!(current.len(), 1);
    }

    #[test]
    fn test_mutation_codec_roundtrip() {
        let mutations = vec![
            StructuredMutation::Upsert(FactUpsert {
                subject: EntityKey::new("alice", "person"),
                predicate: "works_at".into(),
                object: FactValue::EntityRef(EntityKey::new("acme", "org")),
                valid_from_ms: 100,
                valid_to_ms: Some(500),
                asserted_at_ms: 100,
                evidence: vec![Evidence {
                    source_frame_id: 7,
                    chunk_index: Some(2),
                    utf8_span: Some((0, 14)),
                    extractor_id: "rules".into(),
                    extractor_version: "2.1".into(),
                    confidence: Some(0.8),
                    asserted_at_ms: 100,
                }],
            }),
            StructuredMutation::Remove(FactRemove {
                subject: EntityKey::new("alice", "person"),
                predicate: "works_at".into(),
                asserted_at_ms: 900,
            }),
            StructuredMutation::Upsert(FactUpsert {
                subject: EntityKey::new("doc", "file"),
                predicate: "size".into(),
                object: FactValue::I64(4096),
                valid_from_ms: 0,
                valid_to_ms: None,
                asserted_at_ms: 1,
                evidence: Vec::new(),
            }),
        ];
        for mutation in mutations {
            let bytes = mutation.encode().unwrap();
            assert_eq!(StructuredMutation::decode(&bytes).unwrap(), mutation);
        }
    }
}
