//! Binary and JSON encodings of a [`Checkpoint`].
//!
//! The binary layout is little-endian throughout:
//!
//! ```text
//! version[16]  timestamp:u64  pop_size:u64  pop_capacity:u64  generation:u64
//! best:f64  avg:f64  worst:f64  domain_name[64]  has_meta:u8  flags:u8
//! pop_len:u64  pop_bytes  meta_len:u64  meta_bytes  user_len:u64  user_bytes
//! crc32:u32
//! ```
//!
//! Each individual in `pop_bytes` is `genome_len:u64 genome fitness_bits:u64`.
//! `meta_bytes` holds the 22 meta-parameters as `f64`. The CRC covers every
//! byte before it.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::compute::{Genome, Individual, Population};
use crate::error::{EvoError, Result};
use crate::schema::{FIELDS, META_FIELD_COUNT, MetaParams};

use super::exact_f64;

/// Version string written into every checkpoint.
pub const CHECKPOINT_VERSION: &str = "evocore 1.0";

const VERSION_PREFIX: &str = "evocore ";
const SUPPORTED_MAJOR: u32 = 1;
const SUPPORTED_MINOR: u32 = 0;

pub const VERSION_FIELD_LEN: usize = 16;
pub const DOMAIN_NAME_LEN: usize = 64;

/// `flags` bit marking an lz4-compressed population section.
pub const FLAG_LZ4: u8 = 1;

/// Fixed part of the header, up to and including `flags`.
pub const HEADER_SIZE: usize = VERSION_FIELD_LEN + 4 * 8 + 3 * 8 + DOMAIN_NAME_LEN + 2;

/// CRC-32 (IEEE, reflected polynomial `0xEDB88320`).
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    !crc
}

/// How a checkpoint is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointEncoding {
    #[default]
    Binary,
    Json,
}

impl CheckpointEncoding {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            CheckpointEncoding::Binary => "evck",
            CheckpointEncoding::Json => "json",
        }
    }
}

/// Snapshot of a population plus whatever the caller needs to resume.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Seconds since the Unix epoch at capture time.
    pub timestamp: u64,
    pub generation: u64,
    pub capacity: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub worst_fitness: f64,
    pub domain_name: String,
    pub individuals: Vec<Individual>,
    pub meta: Option<MetaParams>,
    /// Opaque caller state.
    pub user_data: Vec<u8>,
}

impl Checkpoint {
    /// Capture `population`, stamped with the current time.
    pub fn capture(population: &Population, domain_name: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            timestamp,
            generation: population.generation(),
            capacity: population.capacity(),
            best_fitness: population.best_fitness(),
            avg_fitness: population.avg_fitness(),
            worst_fitness: population.worst_fitness(),
            domain_name: domain_name.to_string(),
            individuals: population.individuals().to_vec(),
            meta: None,
            user_data: Vec::new(),
        }
    }

    pub fn with_meta(mut self, meta: MetaParams) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_user_data(mut self, user_data: Vec<u8>) -> Self {
        self.user_data = user_data;
        self
    }

    /// Rebuild the captured population, fitness and generation included.
    pub fn to_population(&self) -> Result<Population> {
        let mut population = Population::new(self.capacity.max(self.individuals.len()).max(1))?;
        for ind in &self.individuals {
            population.add(&ind.genome, ind.fitness)?;
        }
        population.set_generation(self.generation);
        population.update_stats();
        Ok(population)
    }

    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            generation: self.generation,
            timestamp: self.timestamp,
            population_size: self.individuals.len(),
            best_fitness: self.best_fitness,
            domain_name: self.domain_name.clone(),
            has_meta: self.meta.is_some(),
        }
    }

    /// Binary encoding. `compress` requests an lz4 population section and is
    /// ignored when the `lz4` feature is off.
    pub fn to_bytes(&self, compress: bool) -> Result<Vec<u8>> {
        let mut out = self.body(compress)?;
        let crc = crc32(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Decode a binary checkpoint: version first, then CRC, then contents.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VERSION_FIELD_LEN {
            return Err(truncated("version"));
        }
        check_version(&bytes[..VERSION_FIELD_LEN])?;

        if bytes.len() < HEADER_SIZE + 3 * 8 + 4 {
            return Err(truncated("header"));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = crc32(body);
        if stored != computed {
            return Err(EvoError::ChecksumMismatch { stored, computed });
        }

        decode_body(body)
    }

    pub fn write_to<W: Write>(&self, w: &mut W, compress: bool) -> Result<()> {
        w.write_all(&self.to_bytes(compress)?)
            .map_err(EvoError::FileWrite)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        r.read_to_end(&mut bytes).map_err(EvoError::FileRead)?;
        Self::from_bytes(&bytes)
    }

    /// Pretty JSON with hex genomes and exact decimal fitness.
    pub fn to_json(&self) -> Result<String> {
        let doc = CheckpointDocument {
            version: CHECKPOINT_VERSION.to_string(),
            timestamp: self.timestamp,
            generation: self.generation,
            capacity: self.capacity,
            best_fitness: self.best_fitness,
            avg_fitness: self.avg_fitness,
            worst_fitness: self.worst_fitness,
            domain_name: self.domain_name.clone(),
            individuals: self
                .individuals
                .iter()
                .map(|ind| IndividualRecord {
                    genome: ind.genome.to_hex(),
                    fitness: ind.fitness,
                })
                .collect(),
            meta: self.meta.as_ref().map(|meta| {
                FIELDS
                    .iter()
                    .zip(meta.to_array())
                    .map(|(field, v)| (field.name.to_string(), ExactValue(v)))
                    .collect()
            }),
            user_data: Genome::view(&self.user_data).to_hex(),
            crc32: crc32(&self.body(false)?),
        };
        serde_json::to_string_pretty(&doc)
            .map_err(|e| EvoError::CheckpointFormat(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: CheckpointDocument = serde_json::from_str(json)
            .map_err(|e| EvoError::CheckpointFormat(e.to_string()))?;
        check_version_str(&doc.version)?;

        let individuals = doc
            .individuals
            .iter()
            .map(|rec| {
                Ok(Individual {
                    genome: Genome::from_hex(&rec.genome)?,
                    fitness: rec.fitness,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let user_data = Genome::from_hex(&doc.user_data)?.as_bytes().to_vec();
        let meta = doc.meta.as_ref().map(decode_meta_map).transpose()?;

        let checkpoint = Self {
            timestamp: doc.timestamp,
            generation: doc.generation,
            capacity: doc.capacity,
            best_fitness: doc.best_fitness,
            avg_fitness: doc.avg_fitness,
            worst_fitness: doc.worst_fitness,
            domain_name: doc.domain_name,
            individuals,
            meta,
            user_data,
        };
        let computed = crc32(&checkpoint.body(false)?);
        if computed != doc.crc32 {
            return Err(EvoError::ChecksumMismatch {
                stored: doc.crc32,
                computed,
            });
        }
        Ok(checkpoint)
    }

    /// Write to `path` in the given encoding.
    pub fn save(&self, path: impl AsRef<Path>, encoding: CheckpointEncoding) -> Result<()> {
        let bytes = match encoding {
            CheckpointEncoding::Binary => self.to_bytes(cfg!(feature = "lz4"))?,
            CheckpointEncoding::Json => self.to_json()?.into_bytes(),
        };
        std::fs::write(path, bytes).map_err(EvoError::FileWrite)
    }

    /// Read from `path`, detecting the encoding from the first byte.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EvoError::FileNotFound(path.to_path_buf()),
            _ => EvoError::FileRead(e),
        })?;
        if bytes.first() == Some(&b'{') {
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| EvoError::CheckpointFormat(e.to_string()))?;
            Self::from_json(text)
        } else {
            Self::from_bytes(&bytes)
        }
    }

    /// Everything the CRC covers.
    fn body(&self, compress: bool) -> Result<Vec<u8>> {
        let name = self.domain_name.as_bytes();
        if name.len() >= DOMAIN_NAME_LEN {
            return Err(EvoError::CheckpointFormat(format!(
                "domain name {:?} longer than {} bytes",
                self.domain_name,
                DOMAIN_NAME_LEN - 1
            )));
        }

        let mut population = Vec::new();
        for ind in &self.individuals {
            let genome = ind.genome.as_bytes();
            population.extend_from_slice(&(genome.len() as u64).to_le_bytes());
            population.extend_from_slice(genome);
            population.extend_from_slice(&ind.fitness.to_bits().to_le_bytes());
        }

        let mut flags = 0u8;
        if compress && cfg!(feature = "lz4") {
            population = compress_lz4(&population);
            flags |= FLAG_LZ4;
        }

        let meta: Vec<u8> = match &self.meta {
            Some(meta) => meta.to_array().iter().flat_map(|v| v.to_le_bytes()).collect(),
            None => Vec::new(),
        };

        let mut out = Vec::with_capacity(
            HEADER_SIZE + population.len() + meta.len() + self.user_data.len() + 28,
        );
        let mut version = [0u8; VERSION_FIELD_LEN];
        version[..CHECKPOINT_VERSION.len()].copy_from_slice(CHECKPOINT_VERSION.as_bytes());
        out.extend_from_slice(&version);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&(self.individuals.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.capacity as u64).to_le_bytes());
        out.extend_from_slice(&self.generation.to_le_bytes());
        out.extend_from_slice(&self.best_fitness.to_le_bytes());
        out.extend_from_slice(&self.avg_fitness.to_le_bytes());
        out.extend_from_slice(&self.worst_fitness.to_le_bytes());
        let mut domain = [0u8; DOMAIN_NAME_LEN];
        domain[..name.len()].copy_from_slice(name);
        out.extend_from_slice(&domain);
        out.push(u8::from(self.meta.is_some()));
        out.push(flags);

        for section in [&population, &meta, &self.user_data] {
            out.extend_from_slice(&(section.len() as u64).to_le_bytes());
            out.extend_from_slice(section);
        }
        Ok(out)
    }
}

/// Summary printed by `evocore --info` and returned by the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointInfo {
    pub generation: u64,
    pub timestamp: u64,
    pub population_size: usize,
    pub best_fitness: f64,
    pub domain_name: String,
    pub has_meta: bool,
}

impl fmt::Display for CheckpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generation {} of {:?}: {} individuals, best {:.6}{}",
            self.generation,
            self.domain_name,
            self.population_size,
            self.best_fitness,
            if self.has_meta { ", with meta-parameters" } else { "" }
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ExactValue(#[serde(with = "exact_f64")] f64);

#[derive(Serialize, Deserialize)]
struct IndividualRecord {
    genome: String,
    #[serde(with = "exact_f64")]
    fitness: f64,
}

#[derive(Serialize, Deserialize)]
struct CheckpointDocument {
    version: String,
    timestamp: u64,
    generation: u64,
    capacity: usize,
    #[serde(with = "exact_f64")]
    best_fitness: f64,
    #[serde(with = "exact_f64")]
    avg_fitness: f64,
    #[serde(with = "exact_f64")]
    worst_fitness: f64,
    domain_name: String,
    individuals: Vec<IndividualRecord>,
    /// Meta-parameters by field name.
    meta: Option<BTreeMap<String, ExactValue>>,
    user_data: String,
    crc32: u32,
}

fn decode_meta_map(map: &BTreeMap<String, ExactValue>) -> Result<MetaParams> {
    let mut values = [0.0; META_FIELD_COUNT];
    for (v, field) in values.iter_mut().zip(FIELDS.iter()) {
        *v = map
            .get(field.name)
            .ok_or_else(|| {
                EvoError::CheckpointFormat(format!("meta parameter {} missing", field.name))
            })?
            .0;
    }
    Ok(MetaParams::from_array(&values))
}

fn truncated(what: &str) -> EvoError {
    EvoError::CheckpointFormat(format!("truncated checkpoint: {}", what))
}

fn check_version(field: &[u8]) -> Result<()> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = std::str::from_utf8(&field[..end])
        .map_err(|_| EvoError::CheckpointFormat("version field is not text".into()))?;
    check_version_str(text)
}

fn check_version_str(text: &str) -> Result<()> {
    let number = text
        .strip_prefix(VERSION_PREFIX)
        .ok_or_else(|| EvoError::CheckpointFormat(format!("not a checkpoint: {:?}", text)))?;
    let mismatch = || EvoError::VersionMismatch {
        found: text.to_string(),
        supported: CHECKPOINT_VERSION,
    };
    let (major, minor) = number.split_once('.').ok_or_else(mismatch)?;
    let major: u32 = major.parse().map_err(|_| mismatch())?;
    let minor: u32 = minor.parse().map_err(|_| mismatch())?;
    if major != SUPPORTED_MAJOR || minor > SUPPORTED_MINOR {
        return Err(mismatch());
    }
    Ok(())
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| truncated(what))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        let bytes = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn f64(&mut self, what: &str) -> Result<f64> {
        Ok(f64::from_bits(self.u64(what)?))
    }

    fn len(&mut self, what: &str) -> Result<usize> {
        let len = self.u64(what)?;
        usize::try_from(len).map_err(|_| truncated(what))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

fn decode_body(body: &[u8]) -> Result<Checkpoint> {
    let mut r = ByteReader::new(body);
    r.take(VERSION_FIELD_LEN, "version")?;
    let timestamp = r.u64("timestamp")?;
    let pop_size = r.len("population size")?;
    let capacity = r.len("population capacity")?;
    let generation = r.u64("generation")?;
    let best_fitness = r.f64("best fitness")?;
    let avg_fitness = r.f64("average fitness")?;
    let worst_fitness = r.f64("worst fitness")?;

    let name = r.take(DOMAIN_NAME_LEN, "domain name")?;
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    let domain_name = std::str::from_utf8(&name[..end])
        .map_err(|_| EvoError::CheckpointFormat("domain name is not UTF-8".into()))?
        .to_string();

    let has_meta = r.u8("meta flag")? != 0;
    let flags = r.u8("flags")?;

    let pop_len = r.len("population length")?;
    let pop_bytes = r.take(pop_len, "population")?;
    let population = if flags & FLAG_LZ4 != 0 {
        decompress_lz4(pop_bytes)?
    } else {
        pop_bytes.to_vec()
    };
    let individuals = decode_population(&population, pop_size)?;

    let meta_len = r.len("meta length")?;
    let meta_bytes = r.take(meta_len, "meta parameters")?;
    let meta = match (has_meta, meta_len) {
        (false, 0) => None,
        (true, len) if len == META_FIELD_COUNT * 8 => {
            let mut values = [0.0; META_FIELD_COUNT];
            for (v, chunk) in values.iter_mut().zip(meta_bytes.chunks_exact(8)) {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                *v = f64::from_le_bytes(buf);
            }
            Some(MetaParams::from_array(&values))
        }
        _ => {
            return Err(EvoError::CheckpointFormat(format!(
                "meta section of {} bytes",
                meta_len
            )));
        }
    };

    let user_len = r.len("user data length")?;
    let user_data = r.take(user_len, "user data")?.to_vec();
    if !r.is_empty() {
        return Err(EvoError::CheckpointFormat(
            "trailing bytes after user data".into(),
        ));
    }

    Ok(Checkpoint {
        timestamp,
        generation,
        capacity,
        best_fitness,
        avg_fitness,
        worst_fitness,
        domain_name,
        individuals,
        meta,
        user_data,
    })
}

fn decode_population(bytes: &[u8], count: usize) -> Result<Vec<Individual>> {
    let mut r = ByteReader::new(bytes);
    // Each record needs at least 16 bytes; reject counts the section cannot hold.
    if count > bytes.len() / 16 {
        return Err(truncated("population"));
    }
    let mut individuals = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.len("genome length")?;
        let genome = Genome::from_data(r.take(len, "genome")?)?;
        let fitness = r.f64("fitness")?;
        individuals.push(Individual { genome, fitness });
    }
    if !r.is_empty() {
        return Err(EvoError::CheckpointFormat(
            "population section longer than its individuals".into(),
        ));
    }
    Ok(individuals)
}

#[cfg(feature = "lz4")]
fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

#[cfg(feature = "lz4")]
fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| EvoError::CheckpointFormat(format!("lz4: {}", e)))
}

#[cfg(not(feature = "lz4"))]
fn compress_lz4(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

#[cfg(not(feature = "lz4"))]
fn decompress_lz4(_data: &[u8]) -> Result<Vec<u8>> {
    Err(EvoError::CheckpointFormat(
        "population is lz4-compressed; rebuild with the lz4 feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Checkpoint {
        let mut population = Population::new(8).unwrap();
        for (i, fitness) in [3.5, f64::NAN, -1.25, 0.1].into_iter().enumerate() {
            let genome = Genome::from_vec(vec![i as u8; 5 + i]).unwrap();
            population.add(&genome, fitness).unwrap();
        }
        population.set_generation(17);
        population.update_stats();
        let mut checkpoint = Checkpoint::capture(&population, "needle")
            .with_meta(MetaParams::default())
            .with_user_data(b"engine state".to_vec());
        checkpoint.timestamp = 1_700_000_000;
        checkpoint
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_binary_roundtrip() {
        let checkpoint = sample();
        let bytes = checkpoint.to_bytes(false).unwrap();
        assert_eq!(&bytes[..CHECKPOINT_VERSION.len()], CHECKPOINT_VERSION.as_bytes());
        let restored = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(restored, checkpoint);
        assert!(restored.individuals[1].fitness.is_nan());

        let population = restored.to_population().unwrap();
        assert_eq!(population.generation(), 17);
        assert_eq!(population.len(), 4);
        assert_eq!(population.best_fitness(), 3.5);
    }

    #[test]
    fn test_oversized_capacity_rejected_on_restore() {
        let mut checkpoint = sample();
        checkpoint.capacity = 1 << 60;
        let restored = Checkpoint::from_bytes(&checkpoint.to_bytes(false).unwrap()).unwrap();
        assert_eq!(restored.capacity, 1 << 60);
        assert!(matches!(
            restored.to_population(),
            Err(EvoError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = sample().to_bytes(false).unwrap();
        let last = bytes.len() - 10;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(EvoError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_version_checked_before_crc() {
        let mut bytes = sample().to_bytes(false).unwrap();
        bytes[8..11].copy_from_slice(b"2.0");
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(EvoError::VersionMismatch { .. })
        ));

        let mut bytes = sample().to_bytes(false).unwrap();
        bytes[..7].copy_from_slice(b"garbage");
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(EvoError::CheckpointFormat(_))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = sample().to_bytes(false).unwrap();
        assert!(Checkpoint::from_bytes(&bytes[..40]).is_err());
        assert!(Checkpoint::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_json_roundtrip_exact() {
        let checkpoint = sample();
        let json = checkpoint.to_json().unwrap();
        assert!(json.contains("\"0.1\""));
        assert!(json.contains("\"NaN\""));
        let restored = Checkpoint::from_json(&json).unwrap();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn test_json_crc_checked() {
        let json = sample().to_json().unwrap();
        let tampered = json.replacen("\"needle\"", "\"sphere\"", 1);
        assert!(matches!(
            Checkpoint::from_json(&tampered),
            Err(EvoError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_save_and_load_both_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = sample();
        for encoding in [CheckpointEncoding::Binary, CheckpointEncoding::Json] {
            let path = dir.path().join(format!("cp.{}", encoding.extension()));
            checkpoint.save(&path, encoding).unwrap();
            assert_eq!(Checkpoint::load(&path).unwrap(), checkpoint);
        }
        assert!(matches!(
            Checkpoint::load(dir.path().join("missing.evck")),
            Err(EvoError::FileNotFound(_))
        ));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_compressed_roundtrip() {
        let checkpoint = sample();
        let bytes = checkpoint.to_bytes(true).unwrap();
        assert_eq!(bytes[HEADER_SIZE - 1] & FLAG_LZ4, FLAG_LZ4);
        assert_eq!(Checkpoint::from_bytes(&bytes).unwrap(), checkpoint);
    }
}
