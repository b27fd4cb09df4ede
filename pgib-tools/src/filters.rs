//! Stream filter glue (§4.6).
//!
//! The core never implements a hash or cipher primitive itself; it only
//! knows the push-bytes / get-result-by-type-id capability a filter
//! exposes. These wrappers adapt that capability onto `Read`/`Write`, the
//! same shape as a pipeline stage, so the builder and serializer can drive
//! plain `io::copy` loops without caring what sits underneath.

use std::io::{self, Read, Write};

use anyhow::Error;
use openssl::symm::{Cipher, Crypter, Mode};
use pgib_types::CoreError;

/// A filter that can be asked for its accumulated result once the stream
/// driving it has been fully consumed.
pub trait StreamFilter {
    type Result;
    fn finish(self) -> Result<Self::Result, Error>;
}

/// Computes a running SHA-1 while the bytes pass through unchanged.
///
/// Used for both the primary (plaintext) and repository (stored-form)
/// checksums a `File` entry carries.
pub struct Sha1Reader<R> {
    inner: R,
    hasher: openssl::sha::Sha1,
}

impl<R: Read> Sha1Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: openssl::sha::Sha1::new(),
        }
    }
}

impl<R: Read> Read for Sha1Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

impl<R> StreamFilter for Sha1Reader<R> {
    type Result = ([u8; 20], R);

    fn finish(self) -> Result<Self::Result, Error> {
        Ok((self.hasher.finish(), self.inner))
    }
}

pub struct Sha1Writer<W> {
    inner: W,
    hasher: openssl::sha::Sha1,
}

impl<W: Write> Sha1Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: openssl::sha::Sha1::new(),
        }
    }
}

impl<W: Write> Write for Sha1Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W> StreamFilter for Sha1Writer<W> {
    type Result = ([u8; 20], W);

    fn finish(self) -> Result<Self::Result, Error> {
        Ok((self.hasher.finish(), self.inner))
    }
}

/// The well-known SHA-1 digest of the empty string (§3.2 invariant 5).
pub fn sha1_of_empty() -> [u8; 20] {
    openssl::sha::Sha1::new().finish()
}

/// Splits a stream into fixed-size blocks and records the checksum of each,
/// matching the on-disk layout a block-incremental file's trailing block-map
/// is checked against (§4.5, §4.6).
pub struct BlockChecksumWriter<W> {
    inner: W,
    block_size: usize,
    checksum_size: usize,
    current: Vec<u8>,
    checksums: Vec<u8>,
}

impl<W: Write> BlockChecksumWriter<W> {
    pub fn new(inner: W, block_size: usize, checksum_size: usize) -> Self {
        Self {
            inner,
            block_size,
            checksum_size,
            current: Vec::with_capacity(block_size),
            checksums: Vec::new(),
        }
    }

    fn flush_block(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let digest = openssl::sha::sha256(&self.current);
        self.checksums
            .extend_from_slice(&digest[..self.checksum_size]);
        self.current.clear();
    }
}

impl<W: Write> Write for BlockChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        let mut remaining = &buf[..n];
        while !remaining.is_empty() {
            let need = self.block_size - self.current.len();
            let take = need.min(remaining.len());
            self.current.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.current.len() == self.block_size {
                self.flush_block();
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W> StreamFilter for BlockChecksumWriter<W> {
    /// Concatenated, `checksum_size`-aligned buffer: one entry per completed
    /// or partial trailing block, in stream order.
    type Result = (Vec<u8>, W);

    fn finish(mut self) -> Result<Self::Result, Error> {
        self.flush_block();
        Ok((self.checksums, self.inner))
    }
}

/// Magic prefix of a salted cipher header (§6.3).
pub const CIPHER_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Derives a key and IV from a passphrase and salt using the legacy
/// OpenSSL `EVP_BytesToKey` construction with SHA-1, the default KDF named
/// in §6.3.
pub fn derive_key_iv(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    let mut out = Vec::new();
    let mut prev: Vec<u8> = Vec::new();

    while out.len() < KEY_LEN + IV_LEN {
        let mut hasher = openssl::sha::Sha1::new();
        hasher.update(&prev);
        hasher.update(passphrase);
        hasher.update(salt);
        let digest = hasher.finish();
        out.extend_from_slice(&digest);
        prev = digest.to_vec();
    }

    key.copy_from_slice(&out[..KEY_LEN]);
    iv.copy_from_slice(&out[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Decrypts an AES-256-CBC payload prefixed with an 8-byte magic and an
/// 8-byte salt (§6.3). Reads the whole ciphertext eagerly; block-incremental
/// super-blocks are always handled one at a time so this is never asked to
/// hold more than a single super-block's worth of data.
pub struct CipherReader<R> {
    inner: R,
}

impl<R: Read> CipherReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn decrypt_all(mut self, passphrase: &[u8]) -> Result<Vec<u8>, Error> {
        let mut header = [0u8; CIPHER_MAGIC.len() + SALT_LEN];
        self.inner.read_exact(&mut header)?;
        if &header[..CIPHER_MAGIC.len()] != CIPHER_MAGIC {
            return Err(CoreError::Cipher("missing salted header magic".to_string()).into());
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&header[CIPHER_MAGIC.len()..]);

        let (key, iv) = derive_key_iv(passphrase, &salt);

        let mut ciphertext = Vec::new();
        self.inner.read_to_end(&mut ciphertext)?;

        let mut crypter = Crypter::new(Cipher::aes_256_cbc(), Mode::Decrypt, &key, Some(&iv))?;
        let mut out = vec![0u8; ciphertext.len() + Cipher::aes_256_cbc().block_size()];
        let mut count = crypter.update(&ciphertext, &mut out)?;
        count += crypter.finalize(&mut out[count..])?;
        out.truncate(count);
        Ok(out)
    }
}

/// Encrypts a payload into the same salted-header AES-256-CBC shape.
pub struct CipherWriter;

impl CipherWriter {
    pub fn encrypt_all(plaintext: &[u8], passphrase: &[u8], salt: [u8; SALT_LEN]) -> Result<Vec<u8>, Error> {
        let (key, iv) = derive_key_iv(passphrase, &salt);

        let mut crypter = Crypter::new(Cipher::aes_256_cbc(), Mode::Encrypt, &key, Some(&iv))?;
        let mut out = vec![0u8; plaintext.len() + Cipher::aes_256_cbc().block_size()];
        let mut count = crypter.update(plaintext, &mut out)?;
        count += crypter.finalize(&mut out[count..])?;
        out.truncate(count);

        let mut framed = Vec::with_capacity(CIPHER_MAGIC.len() + SALT_LEN + out.len());
        framed.extend_from_slice(CIPHER_MAGIC);
        framed.extend_from_slice(&salt);
        framed.extend_from_slice(&out);
        Ok(framed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_reader_matches_known_digest() {
        let data = b"hello world";
        let mut reader = Sha1Reader::new(&data[..]);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        let (digest, _) = reader.finish().unwrap();
        assert_eq!(hex::encode(digest), "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn sha1_of_empty_is_well_known() {
        assert_eq!(
            hex::encode(sha1_of_empty()),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn cipher_reader_rejects_a_missing_salted_header() {
        let err = CipherReader::new(&b"not a cipher frame"[..])
            .decrypt_all(b"passphrase")
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Cipher(_))));
    }

    #[test]
    fn cipher_round_trips() {
        let passphrase = b"correct horse battery staple";
        let salt = [7u8; 8];
        let plaintext = b"page data that needs protecting";

        let framed = CipherWriter::encrypt_all(plaintext, passphrase, salt).unwrap();
        let decrypted = CipherReader::new(&framed[..]).decrypt_all(passphrase).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn block_checksum_writer_emits_one_entry_per_block() {
        let mut out = Vec::new();
        {
            let mut w = BlockChecksumWriter::new(&mut out, 4, 4);
            w.write_all(b"abcdefgh").unwrap();
            let (checksums, _) = w.finish().unwrap();
            assert_eq!(checksums.len(), 8); // two 4-byte blocks
        }
        assert_eq!(out, b"abcdefgh");
    }
}
