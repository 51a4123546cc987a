//! Byte genomes: owned buffers or borrowed views with a logical size.
//!
//! The engine never interprets genome bytes; domains do. A [`Genome`] is
//! either [`Owned`](Genome::from_data) (it allocates and frees its storage)
//! or a [`view`](Genome::view) over caller memory. Views are read-only: every
//! operation that would write or reallocate returns `InvalidArg`, and
//! `clone` is the only way to promote a view to an owned genome.

use std::fmt;

use rand::RngCore;

use crate::error::{EvoError, Result};

use super::rng::EvoRng;

/// Capacity used when `Genome::new(0)` is requested.
pub const MIN_GENOME_CAPACITY: usize = 16;

/// Largest capacity a genome may have.
pub const MAX_GENOME_CAPACITY: usize = 256 * 1024 * 1024;

enum Storage<'a> {
    Owned(Vec<u8>),
    View(&'a [u8]),
}

/// Opaque byte sequence encoding a candidate solution.
pub struct Genome<'a> {
    storage: Storage<'a>,
    size: usize,
}

impl Genome<'static> {
    /// Allocate an owned, zeroed genome with `size == 0`.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = if capacity == 0 {
            MIN_GENOME_CAPACITY
        } else {
            capacity
        };
        check_capacity(capacity)?;

        Ok(Self {
            storage: Storage::Owned(vec![0; capacity]),
            size: 0,
        })
    }

    /// Owned copy of `data`; size and capacity equal `data.len()`.
    pub fn from_data(data: &[u8]) -> Result<Self> {
        check_capacity(data.len())?;
        Ok(Self {
            storage: Storage::Owned(data.to_vec()),
            size: data.len(),
        })
    }

    /// Owned genome taking over `data`.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        check_capacity(data.len())?;
        let size = data.len();
        Ok(Self {
            storage: Storage::Owned(data),
            size,
        })
    }
}

impl<'a> Genome<'a> {
    /// Non-owning view over `data`.
    pub fn view(data: &'a [u8]) -> Self {
        Self {
            storage: Storage::View(data),
            size: data.len(),
        }
    }

    /// Whether this genome owns its buffer.
    pub fn owns_memory(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Logical size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Owned(buf) => buf.len(),
            Storage::View(buf) => buf.len(),
        }
    }

    /// Active bytes, `0..size`.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(buf) => &buf[..self.size],
            Storage::View(buf) => &buf[..self.size],
        }
    }

    /// Mutable active bytes. Views are read-only.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        let size = self.size;
        match &mut self.storage {
            Storage::Owned(buf) => Ok(&mut buf[..size]),
            Storage::View(_) => Err(view_error("modify")),
        }
    }

    fn buffer_mut(&mut self) -> Result<&mut Vec<u8>> {
        match &mut self.storage {
            Storage::Owned(buf) => Ok(buf),
            Storage::View(_) => Err(view_error("modify")),
        }
    }

    /// Change capacity, zero-filling growth. Shrinking below `size` also
    /// truncates the logical size.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        check_capacity(capacity)?;
        let buf = match &mut self.storage {
            Storage::Owned(buf) => buf,
            Storage::View(_) => return Err(view_error("resize")),
        };
        buf.resize(capacity, 0);
        self.size = self.size.min(capacity);
        Ok(())
    }

    /// Set the logical size; must not exceed capacity.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        if size > self.capacity() {
            return Err(EvoError::invalid_arg(format!(
                "size {} exceeds capacity {}",
                size,
                self.capacity()
            )));
        }
        if !self.owns_memory() && size != self.size {
            return Err(view_error("resize"));
        }
        self.size = size;
        Ok(())
    }

    /// Copy `src` into the buffer at `offset`. The logical size grows to
    /// cover the written range.
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(src.len())
            .filter(|&end| end <= self.capacity())
            .ok_or_else(|| {
                EvoError::invalid_arg(format!(
                    "write of {} bytes at offset {} exceeds capacity {}",
                    src.len(),
                    offset,
                    self.capacity()
                ))
            })?;
        let buf = self.buffer_mut()?;
        buf[offset..end].copy_from_slice(src);
        self.size = self.size.max(end);
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the active range.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(dst.len())
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                EvoError::invalid_arg(format!(
                    "read of {} bytes at offset {} exceeds size {}",
                    dst.len(),
                    offset,
                    self.size
                ))
            })?;
        dst.copy_from_slice(&self.as_bytes()[offset..end]);
        Ok(())
    }

    /// Zero the whole buffer.
    pub fn zero(&mut self) -> Result<()> {
        self.buffer_mut()?.fill(0);
        Ok(())
    }

    /// Fill the active bytes from `rng`.
    pub fn randomize(&mut self, rng: &mut EvoRng) -> Result<()> {
        let bytes = self.as_bytes_mut()?;
        rng.fill_bytes(bytes);
        Ok(())
    }

    /// Number of differing bytes. Only defined for equal sizes.
    pub fn distance(&self, other: &Genome<'_>) -> Result<usize> {
        if self.size != other.size {
            return Err(EvoError::invalid_arg(format!(
                "distance between genomes of size {} and {}",
                self.size, other.size
            )));
        }
        Ok(self
            .as_bytes()
            .iter()
            .zip(other.as_bytes())
            .filter(|(a, b)| a != b)
            .count())
    }

    /// Owned copy of the active bytes (capacity is preserved for owned
    /// sources, equals size for views).
    pub fn to_owned_genome(&self) -> Genome<'static> {
        let storage = match &self.storage {
            Storage::Owned(buf) => buf.clone(),
            Storage::View(buf) => buf.to_vec(),
        };
        Genome {
            storage: Storage::Owned(storage),
            size: self.size,
        }
    }

    /// Lowercase hex of the active bytes.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.size * 2);
        for byte in self.as_bytes() {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl Genome<'static> {
    /// Parse the output of [`Genome::to_hex`].
    pub fn from_hex(hex: &str) -> Result<Self> {
        if !hex.is_ascii() || hex.len() % 2 != 0 {
            return Err(EvoError::GenomeInvalid(
                "hex string must be ASCII with even length".into(),
            ));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|e| EvoError::GenomeInvalid(format!("bad hex at {}: {}", i, e)))
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::from_vec(bytes)
    }
}

impl Clone for Genome<'_> {
    /// Always yields an owned genome, even from a view.
    fn clone(&self) -> Self {
        self.to_owned_genome()
    }
}

impl PartialEq for Genome<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for Genome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Genome")
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .field("owned", &self.owns_memory())
            .finish()
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity > MAX_GENOME_CAPACITY {
        return Err(EvoError::GenomeTooLarge {
            size: capacity,
            limit: MAX_GENOME_CAPACITY,
        });
    }
    Ok(())
}

fn view_error(action: &str) -> EvoError {
    EvoError::invalid_arg(format!("cannot {} a genome view", action))
}
