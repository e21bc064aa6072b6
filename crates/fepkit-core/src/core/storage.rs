//! Bounded-memory trajectory storage.
//!
//! [`StoredArrays`] appends frames to chunk files inside a private temporary
//! directory and reads them back one chunk at a time, so a trajectory never has to be
//! held contiguously in memory. Frames are written as raw native-endian `f64` triples
//! through `bytemuck`; the files are private scratch space and never leave the process.
//! The directory is removed when the store is dropped.

use super::models::state::Frame;
use nalgebra::Vector3;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tempfile::TempDir;
use thiserror::Error;
use tracing::trace;

const BYTES_PER_ATOM: usize = std::mem::size_of::<Vector3<f64>>();

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error in trajectory storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame has {found} atoms but the store holds frames of {expected} atoms")]
    FrameShapeMismatch { expected: usize, found: usize },

    #[error("Frame index {index} is out of range for a store of {len} frames")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Chunk {chunk} is out of range for a store of {n_chunks} chunks")]
    ChunkOutOfRange { chunk: usize, n_chunks: usize },
}

#[derive(Debug)]
pub struct StoredArrays {
    dir: TempDir,
    chunks: Vec<(PathBuf, usize)>,
    n_atoms: Option<usize>,
    len: usize,
}

impl StoredArrays {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("fepkit-frames-").tempdir()?,
            chunks: Vec::new(),
            n_atoms: None,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn n_atoms(&self) -> Option<usize> {
        self.n_atoms
    }

    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Writes `frames` as one new chunk. All frames must share the atom count.
    pub fn extend<F: AsRef<[Vector3<f64>]>>(&mut self, frames: &[F]) -> Result<(), StorageError> {
        if frames.is_empty() {
            return Ok(());
        }
        let expected = *self.n_atoms.get_or_insert(frames[0].as_ref().len());
        if let Some(bad) = frames.iter().find(|f| f.as_ref().len() != expected) {
            return Err(StorageError::FrameShapeMismatch {
                expected,
                found: bad.as_ref().len(),
            });
        }

        let path = self.dir.path().join(format!("chunk_{:06}.bin", self.chunks.len()));
        let mut writer = BufWriter::new(File::create(&path)?);
        for frame in frames {
            writer.write_all(bytemuck::cast_slice(frame.as_ref()))?;
        }
        writer.flush()?;

        trace!(chunk = self.chunks.len(), n_frames = frames.len(), "Stored frame chunk");
        self.chunks.push((path, frames.len()));
        self.len += frames.len();
        Ok(())
    }

    /// Random access to one frame. Opens the owning chunk file on every call; use
    /// [`StoredArrays::read_chunk`] or [`StoredArrays::iter`] for sequential passes.
    pub fn get(&self, index: usize) -> Result<Frame, StorageError> {
        if index >= self.len {
            return Err(StorageError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        let n_atoms = self.n_atoms.unwrap_or(0);
        let mut offset = index;
        for (path, count) in &self.chunks {
            if offset < *count {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start((offset * n_atoms * BYTES_PER_ATOM) as u64))?;
                return read_frame(&mut file, n_atoms);
            }
            offset -= count;
        }
        Err(StorageError::IndexOutOfRange {
            index,
            len: self.len,
        })
    }

    /// Every frame of chunk `chunk`, read with a single open.
    pub fn read_chunk(&self, chunk: usize) -> Result<Vec<Frame>, StorageError> {
        let Some((path, count)) = self.chunks.get(chunk) else {
            return Err(StorageError::ChunkOutOfRange {
                chunk,
                n_chunks: self.chunks.len(),
            });
        };
        let n_atoms = self.n_atoms.unwrap_or(0);
        let mut reader = BufReader::new(File::open(path)?);
        (0..*count).map(|_| read_frame(&mut reader, n_atoms)).collect()
    }

    /// Streams frames in order, reading one chunk file at a time.
    pub fn iter(&self) -> impl Iterator<Item = Result<Frame, StorageError>> + '_ {
        let n_atoms = self.n_atoms.unwrap_or(0);
        self.chunks.iter().flat_map(move |(path, count)| {
            let mut reader = File::open(path).map(BufReader::new);
            (0..*count).map(move |_| match reader.as_mut() {
                Ok(r) => read_frame(r, n_atoms),
                Err(e) => Err(StorageError::Io(std::io::Error::new(e.kind(), e.to_string()))),
            })
        })
    }

    /// Independent copy backed by its own directory, made chunk by chunk.
    pub fn duplicate(&self) -> Result<Self, StorageError> {
        let copy = Self::new()?;
        let mut chunks = Vec::with_capacity(self.chunks.len());
        for (i, (path, count)) in self.chunks.iter().enumerate() {
            let target = copy.dir.path().join(format!("chunk_{:06}.bin", i));
            fs::copy(path, &target)?;
            chunks.push((target, *count));
        }
        Ok(Self {
            chunks,
            n_atoms: self.n_atoms,
            len: self.len,
            ..copy
        })
    }
}

fn read_frame<R: Read>(reader: &mut R, n_atoms: usize) -> Result<Frame, StorageError> {
    let mut frame: Frame = vec![Vector3::zeros(); n_atoms];
    reader.read_exact(bytemuck::cast_slice_mut(&mut frame))?;
    Ok(frame)
}

/// Coordinate frames of one lambda window, held in memory or streamed from disk.
#[derive(Debug)]
pub enum Trajectory {
    InMemory(Vec<Frame>),
    Stored(StoredArrays),
}

impl Trajectory {
    pub fn len(&self) -> usize {
        match self {
            Trajectory::InMemory(frames) => frames.len(),
            Trajectory::Stored(store) => store.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame(&self, index: usize) -> Result<Cow<'_, Frame>, StorageError> {
        match self {
            Trajectory::InMemory(frames) => frames
                .get(index)
                .map(Cow::Borrowed)
                .ok_or(StorageError::IndexOutOfRange {
                    index,
                    len: frames.len(),
                }),
            Trajectory::Stored(store) => store.get(index).map(Cow::Owned),
        }
    }

    pub fn last(&self) -> Result<Option<Cow<'_, Frame>>, StorageError> {
        match self.len() {
            0 => Ok(None),
            n => self.frame(n - 1).map(Some),
        }
    }

    /// Visits the frames in order as contiguous batches, passing each batch with the
    /// index of its first frame. A stored trajectory yields one batch per chunk file,
    /// so at most one chunk is resident at a time.
    pub fn try_for_each_batch<E, F>(&self, mut f: F) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnMut(usize, &[Frame]) -> Result<(), E>,
    {
        match self {
            Trajectory::InMemory(frames) => f(0, frames),
            Trajectory::Stored(store) => {
                let mut start = 0;
                for chunk in 0..store.n_chunks() {
                    let batch = store.read_chunk(chunk)?;
                    f(start, &batch)?;
                    start += batch.len();
                }
                Ok(())
            }
        }
    }

    /// Loads every frame into memory.
    pub fn to_vec(&self) -> Result<Vec<Frame>, StorageError> {
        match self {
            Trajectory::InMemory(frames) => Ok(frames.clone()),
            Trajectory::Stored(store) => store.iter().collect(),
        }
    }

    /// Independent copy that shares no storage with `self`.
    pub fn duplicate(&self) -> Result<Self, StorageError> {
        match self {
            Trajectory::InMemory(frames) => Ok(Trajectory::InMemory(frames.clone())),
            Trajectory::Stored(store) => store.duplicate().map(Trajectory::Stored),
        }
    }
}
