//! Structured fact store: subject/predicate/object triples with
//! bi-temporal spans and provenance.
//!
//! Rows are append-only and connected by row-id indirection — facts
//! reference entity and predicate rows, never each other. The whole
//! store is persisted as one `structured_snapshot_v1` segment per
//! commit.

pub mod store;

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::checksum::{sha256, Digest32, DIGEST_SIZE};
use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, WaxError};

pub use store::StructuredStore;

// ── Keys and values ────────────────────────────────────────────────

/// Entity identity: a key string plus a kind (e.g. "person", "org").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub key: String,
    pub kind: String,
}

impl EntityKey {
    pub fn new(key: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
        }
    }
}

/// Object of a triple. Entity references are resolved to row ids at
/// staging time.
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    TimeMs(i64),
    EntityRef(EntityKey),
}

/// Stored object representation: entity references are row ids.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    TimeMs(i64),
    EntityRef(u64),
}

/// Half-open bi-temporal span. A `None` end means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub valid_from_ms: i64,
    pub valid_to_ms: Option<i64>,
    pub system_from_ms: i64,
    pub system_to_ms: Option<i64>,
}

impl Span {
    pub fn open(valid_from_ms: i64, valid_to_ms: Option<i64>, system_from_ms: i64) -> Self {
        Self {
            valid_from_ms,
            valid_to_ms,
            system_from_ms,
            system_to_ms: None,
        }
    }

    pub fn contains(&self, as_of: AsOf) -> bool {
        let valid_ok = as_of.valid_time_ms >= self.valid_from_ms
            && self.valid_to_ms.map_or(true, |to| as_of.valid_time_ms < to);
        let system_ok = as_of.system_time_ms >= self.system_from_ms
            && self
                .system_to_ms
                .map_or(true, |to| as_of.system_time_ms < to);
        valid_ok && system_ok
    }

    pub fn is_fully_open(&self) -> bool {
        self.valid_to_ms.is_none() && self.system_to_ms.is_none()
    }

    /// Stable span identity: SHA-256 over
    /// `(fact_row_id, valid_from, valid_to, system_from)`.
    pub fn key(&self, fact_row_id: u64) -> Digest32 {
        let mut w = ByteWriter::new();
        w.put_u64(fact_row_id);
        w.put_i64(self.valid_from_ms);
        match self.valid_to_ms {
            Some(to) => {
                w.put_u8(1);
                w.put_i64(to);
            }
            None => w.put_u8(0),
        }
        w.put_i64(self.system_from_ms);
        sha256(w.as_slice())
    }
}

/// Provenance row tying a fact to its source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub source_frame_id: u64,
    pub chunk_index: Option<u32>,
    pub utf8_span: Option<(u32, u32)>,
    pub extractor_id: String,
    pub extractor_version: String,
    pub confidence: Option<f64>,
    pub asserted_at_ms: i64,
}

/// Explicit query timestamp pair; `latest` is `i64::MAX` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsOf {
    pub valid_time_ms: i64,
    pub system_time_ms: i64,
}

impl AsOf {
    pub const LATEST: AsOf = AsOf {
        valid_time_ms: i64::MAX,
        system_time_ms: i64::MAX,
    };

    pub fn valid(valid_time_ms: i64) -> Self {
        Self {
            valid_time_ms,
            system_time_ms: i64::MAX,
        }
    }

    pub fn at(valid_time_ms: i64, system_time_ms: i64) -> Self {
        Self {
            valid_time_ms,
            system_time_ms,
        }
    }
}

impl Default for AsOf {
    fn default() -> Self {
        Self::LATEST
    }
}

// ── Rows ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub key: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub row_id: u64,
    pub subject_row: u64,
    pub predicate_row: u64,
    pub object: StoredValue,
    pub identity_hash: Digest32,
    pub spans: Vec<Span>,
    pub evidence: Vec<Evidence>,
}

impl FactRow {
    /// The span open on both axes, if any. At most one exists.
    pub fn open_span_index(&self) -> Option<usize> {
        self.spans.iter().position(Span::is_fully_open)
    }
}

// ── Canonicalisation ───────────────────────────────────────────────

/// NFC-normalise then lowercase; applied to entity keys, kinds, and
/// predicate keys before hashing or interning.
pub fn canonical_key(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}

/// NFC-normalise only; applied to string object values, whose case is
/// significant.
fn canonical_text(s: &str) -> String {
    s.nfc().collect::<String>()
}

// ── Resolved query views ───────────────────────────────────────────

/// One fact match, resolved back to keys for the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct FactView {
    pub fact_row_id: u64,
    pub subject: EntityKey,
    pub predicate: String,
    pub object: FactValue,
    pub span: Span,
    pub evidence: Vec<Evidence>,
}

/// Traversal direction for [`StructuredTables::get_edges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// One edge discovered by the BFS.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub from: EntityKey,
    pub predicate: String,
    pub to: EntityKey,
    pub fact_row_id: u64,
    pub depth: u32,
}

/// BFS result with the truncation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeQueryResult {
    pub edges: Vec<EdgeView>,
    pub was_truncated: bool,
}

// ── Tables ─────────────────────────────────────────────────────────

/// The three row tables plus derived lookup maps. Row ids are dense,
/// starting at 1; row `r` lives at index `r - 1`.
#[derive(Debug, Clone, Default)]
pub struct StructuredTables {
    pub entities: Vec<EntityRow>,
    pub predicates: Vec<String>,
    pub facts: Vec<FactRow>,

    // Derived, rebuilt after load; not persisted.
    entity_index: HashMap<(String, String), u64>,
    predicate_index: HashMap<String, u64>,
    identity_index: HashMap<[u8; DIGEST_SIZE], u64>,
    by_subject: HashMap<u64, Vec<u64>>,
    by_object_entity: HashMap<u64, Vec<u64>>,
}

impl PartialEq for StructuredTables {
    fn eq(&self, other: &Self) -> bool {
        self.entities == other.entities
            && self.predicates == other.predicates
            && self.facts == other.facts
    }
}

impl StructuredTables {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn next_entity_row(&self) -> u64 {
        self.entities.len() as u64 + 1
    }

    pub fn next_predicate_row(&self) -> u64 {
        self.predicates.len() as u64 + 1
    }

    pub fn next_fact_row(&self) -> u64 {
        self.facts.len() as u64 + 1
    }

    fn entity_key(&self, row: u64) -> EntityKey {
        let rec = &self.entities[row as usize - 1];
        EntityKey::new(rec.key.clone(), rec.kind.clone())
    }

    pub fn lookup_entity(&self, key: &EntityKey) -> Option<u64> {
        self.entity_index
            .get(&(canonical_key(&key.key), canonical_key(&key.kind)))
            .copied()
    }

    pub fn lookup_predicate(&self, predicate: &str) -> Option<u64> {
        self.predicate_index.get(&canonical_key(predicate)).copied()
    }

    pub(crate) fn intern_entity(&mut self, key: &EntityKey) -> u64 {
        let canon = (canonical_key(&key.key), canonical_key(&key.kind));
        if let Some(&row) = self.entity_index.get(&canon) {
            return row;
        }
        self.entities.push(EntityRow {
            key: canon.0.clone(),
            kind: canon.1.clone(),
        });
        let row = self.entities.len() as u64;
        self.entity_index.insert(canon, row);
        row
    }

    pub(crate) fn intern_predicate(&mut self, predicate: &str) -> u64 {
        let canon = canonical_key(predicate);
        if let Some(&row) = self.predicate_index.get(&canon) {
            return row;
        }
        self.predicates.push(canon.clone());
        let row = self.predicates.len() as u64;
        self.predicate_index.insert(canon, row);
        row
    }

    pub(crate) fn resolve_value(&mut self, value: &FactValue) -> Result<StoredValue> {
        Ok(match value {
            FactValue::Str(s) => StoredValue::Str(canonical_text(s)),
            FactValue::I64(v) => StoredValue::I64(*v),
            FactValue::F64(v) => {
                if !v.is_finite() {
                    return Err(WaxError::Encoding(format!(
                        "non-finite fact value rejected: {v}"
                    )));
                }
                StoredValue::F64(if *v == 0.0 { 0.0 } else { *v })
            }
            FactValue::Bool(v) => StoredValue::Bool(*v),
            FactValue::Bytes(b) => StoredValue::Bytes(b.clone()),
            FactValue::TimeMs(v) => StoredValue::TimeMs(*v),
            FactValue::EntityRef(key) => StoredValue::EntityRef(self.intern_entity(key)),
        })
    }

    fn value_to_public(&self, value: &StoredValue) -> FactValue {
        match value {
            StoredValue::Str(s) => FactValue::Str(s.clone()),
            StoredValue::I64(v) => FactValue::I64(*v),
            StoredValue::F64(v) => FactValue::F64(*v),
            StoredValue::Bool(v) => FactValue::Bool(*v),
            StoredValue::Bytes(b) => FactValue::Bytes(b.clone()),
            StoredValue::TimeMs(v) => FactValue::TimeMs(*v),
            StoredValue::EntityRef(row) => FactValue::EntityRef(self.entity_key(*row)),
        }
    }

    /// Identity hash `H(subject, predicate, canonical(object))` over
    /// canonicalised inputs. Unique per triple identity.
    pub(crate) fn identity_hash(
        &self,
        subject_row: u64,
        predicate_row: u64,
        object: &StoredValue,
    ) -> Digest32 {
        let subject = &self.entities[subject_row as usize - 1];
        let mut w = ByteWriter::new();
        w.put_str(&subject.key);
        w.put_str(&subject.kind);
        w.put_str(&self.predicates[predicate_row as usize - 1]);
        match object {
            StoredValue::Str(s) => {
                w.put_u8(0);
                w.put_str(s);
            }
            StoredValue::I64(v) => {
                w.put_u8(1);
                w.put_i64(*v);
            }
            StoredValue::F64(v) => {
                w.put_u8(2);
                // Canonicalised at resolve time; always finite here.
                w.put_raw(&v.to_le_bytes());
            }
            StoredValue::Bool(v) => {
                w.put_u8(3);
                w.put_u8(u8::from(*v));
            }
            StoredValue::Bytes(b) => {
                w.put_u8(4);
                w.put_bytes(b);
            }
            StoredValue::TimeMs(v) => {
                w.put_u8(5);
                w.put_i64(*v);
            }
            StoredValue::EntityRef(row) => {
                let target = &self.entities[*row as usize - 1];
                w.put_u8(6);
                w.put_str(&target.key);
                w.put_str(&target.kind);
            }
        }
        sha256(w.as_slice())
    }

    pub(crate) fn lookup_identity(&self, identity: &Digest32) -> Option<u64> {
        self.identity_index.get(identity.as_bytes()).copied()
    }

    pub(crate) fn facts_for_subject(&self, subject_row: u64) -> &[u64] {
        self.by_subject
            .get(&subject_row)
            .map_or(&[], Vec::as_slice)
    }

    pub(crate) fn facts_for_object_entity(&self, entity_row: u64) -> &[u64] {
        self.by_object_entity
            .get(&entity_row)
            .map_or(&[], Vec::as_slice)
    }

    pub(crate) fn register_fact(&mut self, row_id: u64) {
        let fact = &self.facts[row_id as usize - 1];
        self.identity_index
            .insert(*fact.identity_hash.as_bytes(), row_id);
        self.by_subject
            .entry(fact.subject_row)
            .or_default()
            .push(row_id);
        if let StoredValue::EntityRef(target) = fact.object {
            self.by_object_entity.entry(target).or_default().push(row_id);
        }
    }

    /// Rebuild the derived lookup maps after decoding a snapshot.
    pub fn rebuild_indexes(&mut self) {
        self.entity_index.clear();
        self.predicate_index.clear();
        self.identity_index.clear();
        self.by_subject.clear();
        self.by_object_entity.clear();
        for (i, entity) in self.entities.iter().enumerate() {
            self.entity_index
                .insert((entity.key.clone(), entity.kind.clone()), i as u64 + 1);
        }
        for (i, predicate) in self.predicates.iter().enumerate() {
            self.predicate_index.insert(predicate.clone(), i as u64 + 1);
        }
        for i in 0..self.facts.len() {
            self.register_fact(i as u64 + 1);
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Every fact whose valid span contains `as_of.valid_time_ms` and
    /// whose system span contains `as_of.system_time_ms`, optionally
    /// filtered by subject and predicate.
    pub fn get_facts(
        &self,
        subject: Option<&EntityKey>,
        predicate: Option<&str>,
        as_of: AsOf,
    ) -> Vec<FactView> {
        let subject_row = match subject {
            Some(key) => match self.lookup_entity(key) {
                Some(row) => Some(row),
                None => return Vec::new(),
            },
            None => None,
        };
        let predicate_row = match predicate {
            Some(p) => match self.lookup_predicate(p) {
                Some(row) => Some(row),
                None => return Vec::new(),
            },
            None => None,
        };

        let mut out = Vec::new();
        let candidates: Vec<u64> = match subject_row {
            Some(row) => self.facts_for_subject(row).to_vec(),
            None => (1..=self.facts.len() as u64).collect(),
        };
        for row_id in candidates {
            let fact = &self.facts[row_id as usize - 1];
            if let Some(pred) = predicate_row {
                if fact.predicate_row != pred {
                    continue;
                }
            }
            // System spans are disjoint, so at most one span matches.
            if let Some(span) = fact.spans.iter().find(|s| s.contains(as_of)) {
                out.push(FactView {
                    fact_row_id: fact.row_id,
                    subject: self.entity_key(fact.subject_row),
                    predicate: self.predicates[fact.predicate_row as usize - 1].clone(),
                    object: self.value_to_public(&fact.object),
                    span: *span,
                    evidence: fact.evidence.clone(),
                });
            }
        }
        out.sort_by_key(|v| v.fact_row_id);
        out
    }

    /// Bounded BFS over entity-typed object references, from `entity`.
    /// `was_truncated` is set iff any of the three limits cut the
    /// traversal short.
    pub fn get_edges(
        &self,
        entity: &EntityKey,
        direction: Direction,
        depth: u32,
        max_traversal: usize,
        max_results: usize,
    ) -> EdgeQueryResult {
        use std::collections::{HashSet, VecDeque};

        let mut result = EdgeQueryResult {
            edges: Vec::new(),
            was_truncated: false,
        };
        let Some(start) = self.lookup_entity(entity) else {
            return result;
        };

        let mut visited: HashSet<u64> = HashSet::from([start]);
        let mut queue: VecDeque<(u64, u32)> = VecDeque::from([(start, 0)]);
        let mut traversed = 0usize;

        while let Some((row, level)) = queue.pop_front() {
            if level >= depth {
                // There was more graph beyond the depth horizon iff this
                // node still has current edges.
                if self.has_current_edges(row, direction) {
                    result.was_truncated = true;
                }
                continue;
            }
            for (fact_row_id, from_row, to_row) in self.current_edges(row, direction) {
                if traversed >= max_traversal {
                    result.was_truncated = true;
                    return result;
                }
                traversed += 1;
                if result.edges.len() >= max_results {
                    result.was_truncated = true;
                    return result;
                }
                let fact = &self.facts[fact_row_id as usize - 1];
                result.edges.push(EdgeView {
                    from: self.entity_key(from_row),
                    predicate: self.predicates[fact.predicate_row as usize - 1].clone(),
                    to: self.entity_key(to_row),
                    fact_row_id,
                    depth: level + 1,
                });
                let next = if from_row == row { to_row } else { from_row };
                if visited.insert(next) {
                    queue.push_back((next, level + 1));
                }
            }
        }
        result
    }

    /// Current (as-of latest) edges incident to `row`, as
    /// `(fact_row_id, subject_row, object_row)`.
    fn current_edges(&self, row: u64, direction: Direction) -> Vec<(u64, u64, u64)> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for &fact_id in self.facts_for_subject(row) {
                let fact = &self.facts[fact_id as usize - 1];
                if let StoredValue::EntityRef(target) = fact.object {
                    if fact.spans.iter().any(|s| s.contains(AsOf::LATEST)) {
                        out.push((fact_id, row, target));
                    }
                }
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for &fact_id in self.facts_for_object_entity(row) {
                let fact = &self.facts[fact_id as usize - 1];
                if fact.spans.iter().any(|s| s.contains(AsOf::LATEST)) {
                    out.push((fact_id, fact.subject_row, row));
                }
            }
        }
        out.sort_by_key(|&(fact_id, _, _)| fact_id);
        out.dedup();
        out
    }

    fn has_current_edges(&self, row: u64, direction: Direction) -> bool {
        !self.current_edges(row, direction).is_empty()
    }

    // ── Snapshot body codec ────────────────────────────────────────

    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.put_u64(self.entities.len() as u64);
        for entity in &self.entities {
            w.put_str(&entity.key);
            w.put_str(&entity.kind);
        }
        w.put_u64(self.predicates.len() as u64);
        for predicate in &self.predicates {
            w.put_str(predicate);
        }
        w.put_u64(self.facts.len() as u64);
        for fact in &self.facts {
            w.put_u64(fact.row_id);
            w.put_u64(fact.subject_row);
            w.put_u64(fact.predicate_row);
            encode_stored_value(&mut w, &fact.object)?;
            w.put_raw(fact.identity_hash.as_bytes());
            w.put_u32(fact.spans.len() as u32);
            for span in &fact.spans {
                w.put_i64(span.valid_from_ms);
                encode_opt_i64(&mut w, span.valid_to_ms);
                w.put_i64(span.system_from_ms);
                encode_opt_i64(&mut w, span.system_to_ms);
            }
            w.put_u32(fact.evidence.len() as u32);
            for ev in &fact.evidence {
                w.put_u64(ev.source_frame_id);
                encode_opt_u32(&mut w, ev.chunk_index);
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
            }
        }
        Ok(w.into_bytes())
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(body);
        let entity_count = r.read_array_len()?;
        let mut entities = Vec::with_capacity(entity_count as usize);
        for _ in 0..entity_count {
            let key = r.read_str()?;
            let kind = r.read_str()?;
            entities.push(EntityRow { key, kind });
        }
        let predicate_count = r.read_array_len()?;
        let mut predicates = Vec::with_capacity(predicate_count as usize);
        for _ in 0..predicate_count {
            predicates.push(r.read_str()?);
        }
        let fact_count = r.read_array_len()?;
        let mut facts = Vec::with_capacity(fact_count as usize);
        for _ in 0..fact_count {
            let row_id = r.read_u64()?;
            let subject_row = r.read_u64()?;
            let predicate_row = r.read_u64()?;
            let object = decode_stored_value(&mut r)?;
            let identity_hash = Digest32::from_slice(r.read_raw(DIGEST_SIZE)?).unwrap();
            let span_count = r.read_u32()?;
            let mut spans = Vec::with_capacity(span_count as usize);
            for _ in 0..span_count {
                let valid_from_ms = r.read_i64()?;
                let valid_to_ms = decode_opt_i64(&mut r)?;
                let system_from_ms = r.read_i64()?;
                let system_to_ms = decode_opt_i64(&mut r)?;
                spans.push(Span {
                    valid_from_ms,
                    valid_to_ms,
                    system_from_ms,
                    system_to_ms,
                });
            }
            let evidence_count = r.read_u32()?;
            let mut evidence = Vec::with_capacity(evidence_count as usize);
            for _ in 0..evidence_count {
                let source_frame_id = r.read_u64()?;
                let chunk_index = decode_opt_u32(&mut r)?;
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
                evidence.push(Evidence {
                    source_frame_id,
                    chunk_index,
                    utf8_span,
                    extractor_id,
                    extractor_version,
                    confidence,
                    asserted_at_ms,
                });
            }
            facts.push(FactRow {
                row_id,
                subject_row,
                predicate_row,
                object,
                identity_hash,
                spans,
                evidence,
            });
        }
        r.finish()?;

        let mut tables = Self {
            entities,
            predicates,
            facts,
            ..Default::default()
        };
        tables.rebuild_indexes();
        Ok(tables)
    }
}

fn encode_stored_value(w: &mut ByteWriter, value: &StoredValue) -> Result<()> {
    match value {
        StoredValue::Str(s) => {
            w.put_u8(0);
            w.put_str(s);
        }
        StoredValue::I64(v) => {
            w.put_u8(1);
            w.put_i64(*v);
        }
        StoredValue::F64(v) => {
            w.put_u8(2);
            w.put_f64(*v)?;
        }
        StoredValue::Bool(v) => {
            w.put_u8(3);
            w.put_u8(u8::from(*v));
        }
        StoredValue::Bytes(b) => {
            w.put_u8(4);
            w.put_bytes(b);
        }
        StoredValue::TimeMs(v) => {
            w.put_u8(5);
            w.put_i64(*v);
        }
        StoredValue::EntityRef(row) => {
            w.put_u8(6);
            w.put_u64(*row);
        }
    }
    Ok(())
}

fn decode_stored_value(r: &mut ByteReader<'_>) -> Result<StoredValue> {
    Ok(match r.read_u8()? {
        0 => StoredValue::Str(r.read_str()?),
        1 => StoredValue::I64(r.read_i64()?),
        2 => StoredValue::F64(r.read_f64()?),
        3 => StoredValue::Bool(r.read_u8()? != 0),
        4 => StoredValue::Bytes(r.read_bytes()?),
        5 => StoredValue::TimeMs(r.read_i64()?),
        6 => StoredValue::EntityRef(r.read_u64()?),
        tag => {
            return Err(WaxError::Encoding(format!(
                "unknown fact value tag {tag}"
            )))
        }
    })
}

fn encode_opt_i64(w: &mut ByteWriter, v: Option<i64>) {
    match v {
        Some(v) => {
            w.put_u8(1);
            w.put_i64(v);
        }
        None => w.put_u8(0),
    }
}

fn decode_opt_i64(r: &mut ByteReader<'_>) -> Result<Option<i64>> {
    Ok(if r.read_u8()? == 1 {
        Some(r.read_i64()?)
    } else {
        None
    })
}

fn encode_opt_u32(w: &mut ByteWriter, v: Option<u32>) {
    match v {
        Some(v) => {
            w.put_u8(1);
            w.put_u32(v);
        }
        None => w.put_u8(0),
    }
}

fn decode_opt_u32(r: &mut ByteReader<'_>) -> Result<Option<u32>> {
    Ok(if r.read_u8()? == 1 {
        Some(r.read_u32()?)
    } else {
        None
    })
}
