//! Append-only log of irreversible blocks.
//!
//! The log is the public witness of finality: entries are never rewritten
//! and only blocks below the irreversibility horizon reach it, so fork
//! divergence below the log tail is impossible. On disk it is a single
//! file of length-framed bincode entries; opening rescans the file to
//! rebuild the number and id indexes.

use crate::block::SignedBlock;
use crate::error::ChainError;
use cascade_types::BlockId;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "blocks.log";

pub struct BlockLog {
    path: PathBuf,
    file: File,
    /// Byte offset of each entry, indexed by `block_num - 1`.
    offsets: Vec<u64>,
    ids: HashMap<BlockId, u32>,
    head: Option<SignedBlock>,
}

impl BlockLog {
    /// Open (or create) the log in `dir`, rescanning existing entries.
    pub fn open(dir: &Path) -> Result<Self, ChainError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut log = Self {
            path,
            file,
            offsets: Vec::new(),
            ids: HashMap::new(),
            head: None,
        };
        log.rescan()?;
        Ok(log)
    }

    fn rescan(&mut self) -> Result<(), ChainError> {
        let mut reader = File::open(&self.path)?;
        let len = reader.metadata()?.len();
        let mut offset = 0u64;
        let mut last: Option<SignedBlock> = None;

        while offset < len {
            reader.seek(SeekFrom::Start(offset))?;
            let mut frame = [0u8; 8];
            reader.read_exact(&mut frame)?;
            let entry_len = u64::from_le_bytes(frame);
            let mut bytes = vec![0u8; entry_len as usize];
            reader.read_exact(&mut bytes)?;
            let block: SignedBlock =
                bincode::deserialize(&bytes).map_err(|e| ChainError::BlockLogCodec(e.to_string()))?;

            let expected = self.offsets.len() as u32 + 1;
            if block.block_num() != expected {
                return Err(ChainError::BlockLogCodec(format!(
                    "log entry {} holds block {}",
                    expected,
                    block.block_num()
                )));
            }
            self.ids.insert(block.id(), block.block_num());
            self.offsets.push(offset);
            offset += 8 + entry_len;
            last = Some(block);
        }
        self.head = last;
        Ok(())
    }

    /// Append the next irreversible block. The block's number must be
    /// exactly one past the current log head.
    pub fn append(&mut self, block: &SignedBlock) -> Result<(), ChainError> {
        let expected = self.head.as_ref().map(|h| h.block_num() + 1).unwrap_or(1);
        if block.block_num() != expected {
            return Err(ChainError::LogAppendOutOfOrder {
                expected,
                got: block.block_num(),
            });
        }
        let bytes =
            bincode::serialize(block).map_err(|e| ChainError::BlockLogCodec(e.to_string()))?;
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&(bytes.len() as u64).to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;

        self.offsets.push(offset);
        self.ids.insert(block.id(), block.block_num());
        self.head = Some(block.clone());
        Ok(())
    }

    pub fn read_block_by_num(&self, num: u32) -> Result<Option<SignedBlock>, ChainError> {
        if num == 0 || num as usize > self.offsets.len() {
            return Ok(None);
        }
        let offset = self.offsets[num as usize - 1];
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut frame = [0u8; 8];
        reader.read_exact(&mut frame)?;
        let entry_len = u64::from_le_bytes(frame);
        let mut bytes = vec![0u8; entry_len as usize];
        reader.read_exact(&mut bytes)?;
        let block =
            bincode::deserialize(&bytes).map_err(|e| ChainError::BlockLogCodec(e.to_string()))?;
        Ok(Some(block))
    }

    pub fn read_block_by_id(&self, id: &BlockId) -> Result<Option<SignedBlock>, ChainError> {
        match self.ids.get(id) {
            Some(num) => self.read_block_by_num(*num),
            None => Ok(None),
        }
    }

    pub fn read_head(&self) -> Option<&SignedBlock> {
        self.head.as_ref()
    }
}
