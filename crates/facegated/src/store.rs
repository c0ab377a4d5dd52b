use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use facegate_core::types::{EMBEDDING_DIM, EMBEDDING_DIM_BASIC, LANDMARK_DIM};
use facegate_core::EnrollmentTemplate;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio_rusqlite::Connection;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("template encryption failed")]
    EncryptionFailed,
    #[error("template decryption failed — key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid template blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding dimension: {0}")]
    InvalidDimension(usize),
    #[error("invalid template value (NaN/Inf)")]
    InvalidValue,
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed enrollment template storage with AES-256-GCM encryption.
///
/// Embedding and landmark vectors are encrypted before storage and decrypted
/// on retrieval. A per-installation 32-byte key is generated at first use and
/// stored at `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct TemplateStore {
    conn: Connection,
    enc_key: [u8; 32],
}

/// One stored template with its metadata.
#[derive(Debug, Clone)]
pub struct StoredTemplate {
    pub id: String,
    pub user: String,
    pub label: String,
    pub template: EnrollmentTemplate,
    pub created_at: String,
}

/// Metadata about a stored template (no biometric data).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateInfo {
    pub id: String,
    pub label: String,
    pub dimension: usize,
    pub avg_quality: f64,
    pub sample_count: i64,
    pub created_at: String,
}

impl TemplateStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/facegate"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS templates (
                     id TEXT PRIMARY KEY,
                     user TEXT NOT NULL,
                     label TEXT NOT NULL,
                     embedding BLOB NOT NULL,
                     landmarks BLOB,
                     dimension INTEGER NOT NULL,
                     avg_quality REAL NOT NULL DEFAULT 0.0,
                     sample_count INTEGER NOT NULL DEFAULT 0,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_templates_user ON templates(user);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    /// Insert a new template. Returns the generated UUID.
    pub async fn insert(
        &self,
        user: &str,
        label: &str,
        template: &EnrollmentTemplate,
    ) -> Result<String, StoreError> {
        validate_template(template)?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let dimension = template.embedding.len() as i64;
        let avg_quality = template.avg_quality as f64;
        let sample_count = template.sample_count as i64;

        // Encrypt before entering the SQLite closure
        let embedding_blob = self.encrypt_vector(&template.embedding)?;
        let landmarks_blob = template
            .landmarks
            .as_ref()
            .map(|lm| self.encrypt_vector(lm))
            .transpose()?;

        let id_clone = id.clone();
        let user = user.to_string();
        let label = label.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO templates (id, user, label, embedding, landmarks, dimension, avg_quality, sample_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        id_clone,
                        user,
                        label,
                        embedding_blob,
                        landmarks_blob,
                        dimension,
                        avg_quality,
                        sample_count,
                        created_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(id)
    }

    /// All templates for a user, oldest first. This is the gallery a
    /// verification run compares against.
    pub async fn get_for_user(&self, user: &str) -> Result<Vec<StoredTemplate>, StoreError> {
        let user = user.to_string();

        // Fetch raw rows; decrypt outside the blocking closure
        type Row = (
            String,
            String,
            String,
            Vec<u8>,
            Option<Vec<u8>>,
            i64,
            f64,
            i64,
            String,
        );
        let rows: Vec<Row> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user, label, embedding, landmarks, dimension, avg_quality, sample_count, created_at
                     FROM templates WHERE user = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map([&user], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut templates = Vec::with_capacity(rows.len());
        for (id, user, label, emb_blob, lm_blob, dimension, avg_quality, sample_count, created_at) in
            rows
        {
            let embedding = self.decrypt_vector(&emb_blob, dimension as usize)?;
            let landmarks = lm_blob
                .map(|b| self.decrypt_vector(&b, LANDMARK_DIM))
                .transpose()?;
            templates.push(StoredTemplate {
                id,
                user,
                label,
                template: EnrollmentTemplate {
                    embedding,
                    landmarks,
                    avg_quality: avg_quality as f32,
                    sample_count: sample_count as usize,
                },
                created_at,
            });
        }
        Ok(templates)
    }

    /// List templates for a user (metadata only, no biometric data).
    pub async fn list_by_user(&self, user: &str) -> Result<Vec<TemplateInfo>, StoreError> {
        let user = user.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, label, dimension, avg_quality, sample_count, created_at
                     FROM templates WHERE user = ?1 ORDER BY created_at",
                )?;
                let rows = stmt.query_map([&user], |row| {
                    Ok(TemplateInfo {
                        id: row.get(0)?,
                        label: row.get(1)?,
                        dimension: row.get::<_, i64>(2)? as usize,
                        avg_quality: row.get(3)?,
                        sample_count: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Remove a template by ID, scoped to a user for cross-user protection.
    pub async fn remove(&self, user: &str, template_id: &str) -> Result<bool, StoreError> {
        let user = user.to_string();
        let template_id = template_id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM templates WHERE id = ?1 AND user = ?2",
                    [&template_id, &user],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count stored templates across all users.
    pub async fn count_all(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM templates", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt an f32 vector with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_vector(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        let plaintext = vector_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a vector blob and check its length against `expected_dim`.
    fn decrypt_vector(&self, blob: &[u8], expected_dim: usize) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_vector(&plaintext, expected_dim)
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn vector_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8], expected_dim: usize) -> Result<Vec<f32>, StoreError> {
    if bytes.len() != expected_dim * 4 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(expected_dim);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidValue);
        }
        values.push(v);
    }
    Ok(values)
}

fn validate_template(template: &EnrollmentTemplate) -> Result<(), StoreError> {
    let dim = template.embedding.len();
    if dim != EMBEDDING_DIM && dim != EMBEDDING_DIM_BASIC {
        return Err(StoreError::InvalidDimension(dim));
    }
    if template.embedding.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidValue);
    }
    if let Some(lm) = &template.landmarks {
        if lm.len() != LANDMARK_DIM {
            return Err(StoreError::InvalidDimension(lm.len()));
        }
        if lm.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidValue);
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
