//! Chunked authenticated encryption for item payloads.
//!
//! Blob layout:
//!
//! ```text
//! header (16 bytes): "BQSTRM1\0" | chunk_size u32 LE | reserved u32
//! chunk*           : nonce (24) | ciphertext | tag (16)
//! ```
//!
//! Every chunk is sealed with XChaCha20-Poly1305 under a fresh random nonce.
//! The associated data is `header | chunk index u64 LE | final flag`, so
//! chunks cannot be reordered, dropped from the end or spliced between blobs
//! without the tag check failing. A SHA-256 over the whole blob and another
//! over the plaintext are returned for the catalog; decryption only reports
//! success once the plaintext digest matches the expected one.
//!
//! File operations are async and honour a [`CancellationToken`] between
//! chunks. Output is written to a staging file and renamed into place, so a
//! failed or cancelled run leaves nothing behind.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::CipherError;
use crate::fs_util::staging_path;
use crate::settings::MAX_CHUNK_SIZE;

pub const BLOB_MAGIC: &[u8; 8] = b"BQSTRM1\0";
pub const BLOB_HEADER_LEN: usize = 16;
pub const CHUNK_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedOutput {
    pub plaintext_checksum: String,
    pub ciphertext_checksum: String,
    pub plaintext_len: u64,
    pub ciphertext_len: u64,
}

/// Digests a decryption must reproduce before its output is trusted.
#[derive(Debug, Clone, Default)]
pub struct ExpectedChecksums<'a> {
    pub plaintext: Option<&'a str>,
    pub ciphertext: Option<&'a str>,
}

impl<'a> ExpectedChecksums<'a> {
    pub fn plaintext(checksum: &'a str) -> Self {
        Self {
            plaintext: Some(checksum),
            ciphertext: None,
        }
    }

    pub fn both(plaintext: &'a str, ciphertext: &'a str) -> Self {
        Self {
            plaintext: Some(plaintext),
            ciphertext: Some(ciphertext),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cipher {
    chunk_size: usize,
}

impl Cipher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn header(&self) -> [u8; BLOB_HEADER_LEN] {
        let mut header = [0u8; BLOB_HEADER_LEN];
        header[..8].copy_from_slice(BLOB_MAGIC);
        header[8..12].copy_from_slice(&(self.chunk_size as u32).to_le_bytes());
        header
    }

    pub fn encrypt_bytes(
        &self,
        key: &[u8; KEY_LEN],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, SealedOutput), CipherError> {
        if plaintext.is_empty() {
            return Err(CipherError::FileEmpty);
        }
        let header = self.header();
        let mut sealer = ChunkSealer::new(key, header);
        let chunk_count = plaintext.len().div_ceil(self.chunk_size);
        let mut out = Vec::with_capacity(
            BLOB_HEADER_LEN + plaintext.len() + chunk_count * CHUNK_OVERHEAD,
        );
        out.extend_from_slice(&header);
        for (i, chunk) in plaintext.chunks(self.chunk_size).enumerate() {
            out.extend_from_slice(&sealer.seal(chunk, i + 1 == chunk_count)?);
        }
        Ok((out, sealer.finish()))
    }

    pub fn decrypt_bytes(
        key: &[u8; KEY_LEN],
        blob: &[u8],
        expected: &ExpectedChecksums<'_>,
    ) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if let Some(want) = expected.ciphertext {
            if crypto::sha256_hex(blob) != want {
                return Err(CipherError::ChecksumMismatch);
            }
        }
        if blob.len() < BLOB_HEADER_LEN {
            return Err(CipherError::MalformedBlob("truncated header".into()));
        }
        let (header_bytes, body) = blob.split_at(BLOB_HEADER_LEN);
        let header = parse_header(header_bytes)?;
        let sealed_len = header.chunk_size + CHUNK_OVERHEAD;
        if body.is_empty() {
            return Err(CipherError::MalformedBlob("no chunks".into()));
        }
        let mut opener = ChunkOpener::new(key, header.raw);
        let mut plaintext = Zeroizing::new(Vec::with_capacity(body.len()));
        let chunk_count = body.len().div_ceil(sealed_len);
        for (i, sealed) in body.chunks(sealed_len).enumerate() {
            let opened = opener.open(sealed, i + 1 == chunk_count)?;
            plaintext.extend_from_slice(&opened);
        }
        opener.verify(expected)?;
        Ok(plaintext)
    }

    /// Stream `src` into a sealed blob at `dst`.
    pub async fn encrypt_file(
        &self,
        key: &[u8; KEY_LEN],
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<SealedOutput, CipherError> {
        let mut reader = File::open(src)
            .await
            .map_err(|e| CipherError::CannotOpenFile(format!("{}: {e}", src.display())))?;
        let staging = staging_path(dst);
        let result = self.encrypt_stream(key, &mut reader, &staging, cancel).await;
        finish_staging(result, &staging, dst).await
    }

    async fn encrypt_stream<R: AsyncRead + Unpin>(
        &self,
        key: &[u8; KEY_LEN],
        reader: &mut R,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<SealedOutput, CipherError> {
        let mut current = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut next = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut current_len = read_full(reader, &mut current).await?;
        if current_len == 0 {
            return Err(CipherError::FileEmpty);
        }

        let header = self.header();
        let mut sealer = ChunkSealer::new(key, header);
        let mut out = File::create(staging).await?;
        out.write_all(&header).await?;
        let mut chunks = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(CipherError::Cancelled);
            }
            let next_len = read_full(reader, &mut next).await?;
            let last = next_len == 0;
            let sealed = sealer.seal(&current[..current_len], last)?;
            out.write_all(&sealed).await?;
            chunks += 1;
            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }
        out.flush().await?;
        out.sync_all().await?;
        debug!(chunks, "sealed stream");
        Ok(sealer.finish())
    }

    /// Stream the blob at `src` into plaintext at `dst`. Returns the
    /// plaintext length once every expected checksum has matched.
    pub async fn decrypt_file(
        key: &[u8; KEY_LEN],
        src: &Path,
        dst: &Path,
        expected: &ExpectedChecksums<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, CipherError> {
        let mut reader = File::open(src)
            .await
            .map_err(|e| CipherError::CannotOpenFile(format!("{}: {e}", src.display())))?;
        let staging = staging_path(dst);
        let result = Self::decrypt_stream(key, &mut reader, &staging, expected, cancel).await;
        finish_staging(result, &staging, dst).await
    }

    async fn decrypt_stream<R: AsyncRead + Unpin>(
        key: &[u8; KEY_LEN],
        reader: &mut R,
        staging: &Path,
        expected: &ExpectedChecksums<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, CipherError> {
        let mut header_bytes = [0u8; BLOB_HEADER_LEN];
        if read_full(reader, &mut header_bytes).await? < BLOB_HEADER_LEN {
            return Err(CipherError::MalformedBlob("truncated header".into()));
        }
        let header = parse_header(&header_bytes)?;
        let sealed_len = header.chunk_size + CHUNK_OVERHEAD;
        let mut current = vec![0u8; sealed_len];
        let mut next = vec![0u8; sealed_len];
        let mut current_len = read_full(reader, &mut current).await?;
        if current_len == 0 {
            return Err(CipherError::MalformedBlob("no chunks".into()));
        }

        let mut opener = ChunkOpener::new(key, header.raw);
        let mut out = File::create(staging).await?;
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(CipherError::Cancelled);
            }
            let next_len = read_full(reader, &mut next).await?;
            let last = next_len == 0;
            let opened = opener.open(&current[..current_len], last)?;
            out.write_all(&opened).await?;
            written += opened.len() as u64;
            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
        }
        opener.verify(expected)?;
        out.flush().await?;
        out.sync_all().await?;
        Ok(written)
    }
}

struct BlobHeader {
    raw: [u8; BLOB_HEADER_LEN],
    chunk_size: usize,
}

fn parse_header(bytes: &[u8]) -> Result<BlobHeader, CipherError> {
    if bytes.len() != BLOB_HEADER_LEN || &bytes[..8] != BLOB_MAGIC {
        return Err(CipherError::MalformedBlob("bad magic".into()));
    }
    let mut size = [0u8; 4];
    size.copy_from_slice(&bytes[8..12]);
    let chunk_size = u32::from_le_bytes(size) as usize;
    if chunk_size == 0 {
        return Err(CipherError::MalformedBlob("zero chunk size".into()));
    }
    // Checked before any chunk buffer is sized from it.
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(CipherError::MalformedBlob(format!(
            "chunk size {chunk_size} exceeds {MAX_CHUNK_SIZE}"
        )));
    }
    let mut raw = [0u8; BLOB_HEADER_LEN];
    raw.copy_from_slice(bytes);
    Ok(BlobHeader { raw, chunk_size })
}

fn chunk_aad(header: &[u8; BLOB_HEADER_LEN], index: u64, last: bool) -> [u8; BLOB_HEADER_LEN + 9] {
    let mut aad = [0u8; BLOB_HEADER_LEN + 9];
    aad[..BLOB_HEADER_LEN].copy_from_slice(header);
    aad[BLOB_HEADER_LEN..BLOB_HEADER_LEN + 8].copy_from_slice(&index.to_le_bytes());
    aad[BLOB_HEADER_LEN + 8] = u8::from(last);
    aad
}

struct ChunkSealer<'k> {
    key: &'k [u8; KEY_LEN],
    header: [u8; BLOB_HEADER_LEN],
    index: u64,
    plaintext_hash: Sha256,
    ciphertext_hash: Sha256,
    plaintext_len: u64,
    ciphertext_len: u64,
}

impl<'k> ChunkSealer<'k> {
    fn new(key: &'k [u8; KEY_LEN], header: [u8; BLOB_HEADER_LEN]) -> Self {
        let mut ciphertext_hash = Sha256::new();
        ciphertext_hash.update(header);
        Self {
            key,
            header,
            index: 0,
            plaintext_hash: Sha256::new(),
            ciphertext_hash,
            plaintext_len: 0,
            ciphertext_len: BLOB_HEADER_LEN as u64,
        }
    }

    fn seal(&mut self, chunk: &[u8], last: bool) -> Result<Vec<u8>, CipherError> {
        let aad = chunk_aad(&self.header, self.index, last);
        let sealed = crypto::seal(self.key, chunk, &aad).ok_or(CipherError::EncryptionFailed)?;
        self.index += 1;
        self.plaintext_hash.update(chunk);
        self.ciphertext_hash.update(&sealed);
        self.plaintext_len += chunk.len() as u64;
        self.ciphertext_len += sealed.len() as u64;
        Ok(sealed)
    }

    fn finish(self) -> SealedOutput {
        SealedOutput {
            plaintext_checksum: hex::encode(self.plaintext_hash.finalize()),
            ciphertext_checksum: hex::encode(self.ciphertext_hash.finalize()),
            plaintext_len: self.plaintext_len,
            ciphertext_len: self.ciphertext_len,
        }
    }
}

struct ChunkOpener<'k> {
    key: &'k [u8; KEY_LEN],
    header: [u8; BLOB_HEADER_LEN],
    index: u64,
    plaintext_hash: Sha256,
    ciphertext_hash: Sha256,
}

impl<'k> ChunkOpener<'k> {
    fn new(key: &'k [u8; KEY_LEN], header: [u8; BLOB_HEADER_LEN]) -> Self {
        let mut ciphertext_hash = Sha256::new();
        ciphertext_hash.update(header);
        Self {
            key,
            header,
            index: 0,
            plaintext_hash: Sha256::new(),
            ciphertext_hash,
        }
    }

    fn open(&mut self, sealed: &[u8], last: bool) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        if sealed.len() < CHUNK_OVERHEAD {
            return Err(CipherError::DecryptionFailed);
        }
        let aad = chunk_aad(&self.header, self.index, last);
        let opened = crypto::open(self.key, sealed, &aad).ok_or(CipherError::DecryptionFailed)?;
        self.index += 1;
        self.ciphertext_hash.update(sealed);
        self.plaintext_hash.update(opened.as_slice());
        Ok(opened)
    }

    fn verify(self, expected: &ExpectedChecksums<'_>) -> Result<(), CipherError> {
        if let Some(want) = expected.ciphertext {
            if hex::encode(self.ciphertext_hash.finalize()) != want {
                return Err(CipherError::ChecksumMismatch);
            }
        }
        if let Some(want) = expected.plaintext {
            if hex::encode(self.plaintext_hash.finalize()) != want {
                return Err(CipherError::ChecksumMismatch);
            }
        }
        Ok(())
    }
}

/// Fill `buf` unless the reader hits EOF first; returns bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CipherError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn finish_staging<T>(
    result: Result<T, CipherError>,
    staging: &Path,
    dst: &Path,
) -> Result<T, CipherError> {
    match result {
        Ok(value) => {
            if let Err(e) = fs::rename(staging, dst).await {
                let _ = fs::remove_file(staging).await;
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            let _ = fs::remove_file(staging).await;
            Err(e)
        }
    }
}
