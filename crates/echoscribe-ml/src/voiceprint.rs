//! Voice-print matching and storage
//!
//! Cross-session speaker recognition: named embeddings persisted outside
//! any session, matched by cosine similarity on L2-normalized vectors.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Confidence tier thresholds (cosine similarity). Deliberately softer
/// than same-session profile matching: the registry compares embeddings
/// across recording conditions.
#[derive(Debug, Clone, Copy)]
pub struct VoicePrintThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for VoicePrintThresholds {
    fn default() -> Self {
        Self {
            low: 0.55,
            high: 0.70,
        }
    }
}

/// Confidence tier for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    High,
    Low,
    None,
}

impl MatchConfidence {
    pub fn from_similarity(similarity: f32, thresholds: VoicePrintThresholds) -> Self {
        if similarity >= thresholds.high {
            Self::High
        } else if similarity >= thresholds.low {
            Self::Low
        } else {
            Self::None
        }
    }
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Low => write!(f, "low"),
            Self::None => write!(f, "none"),
        }
    }
}

/// A saved voice print
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePrint {
    pub id: String,
    pub name: String,
    /// Averaged embedding, unit L2 norm
    pub embedding: Vec<f32>,
    pub created_at: String,
    pub updated_at: String,
    pub last_seen_at: String,
    pub seen_count: i32,
    /// Channel the print was captured from ("mic" or "sys")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Storage file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoicePrintStore {
    version: i32,
    voiceprints: Vec<VoicePrint>,
}

impl Default for VoicePrintStore {
    fn default() -> Self {
        Self {
            version: 1,
            voiceprints: Vec::new(),
        }
    }
}

/// Match result
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub voiceprint: VoicePrint,
    pub similarity: f32,
    pub confidence: MatchConfidence,
}

/// Voice-print storage and matching engine.
///
/// Writes are serialized through the lock; list queries clone.
pub struct VoicePrintRegistry {
    path: PathBuf,
    thresholds: VoicePrintThresholds,
    data: Arc<RwLock<VoicePrintStore>>,
}

impl VoicePrintRegistry {
    /// Open (or create) `speakers.json` under the data directory
    pub fn new(data_dir: PathBuf, thresholds: VoicePrintThresholds) -> Result<Self> {
        let path = data_dir.join("speakers.json");

        let data = if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read speakers.json")?;
            serde_json::from_str(&content).context("Failed to parse speakers.json")?
        } else {
            VoicePrintStore::default()
        };

        tracing::info!(
            "VoicePrintRegistry: loaded {} voiceprints from {:?}",
            data.voiceprints.len(),
            path
        );

        Ok(Self {
            path,
            thresholds,
            data: Arc::new(RwLock::new(data)),
        })
    }

    pub fn thresholds(&self) -> VoicePrintThresholds {
        self.thresholds
    }

    /// Best matching voice print for an embedding, or None below the
    /// low threshold
    pub fn find_best_match(&self, embedding: &[f32]) -> Option<MatchResult> {
        let data = self.data.read();

        let mut best: Option<MatchResult> = None;
        let mut best_similarity = 0.0f32;

        for vp in &data.voiceprints {
            let similarity = cosine_similarity(embedding, &vp.embedding);

            if similarity > best_similarity && similarity >= self.thresholds.low {
                best_similarity = similarity;
                best = Some(MatchResult {
                    voiceprint: vp.clone(),
                    similarity,
                    confidence: MatchConfidence::from_similarity(similarity, self.thresholds),
                });
            }
        }

        if let Some(ref m) = best {
            tracing::info!(
                "VoicePrint match: {} (similarity={:.2}, confidence={})",
                m.voiceprint.name,
                m.similarity,
                m.confidence
            );
        }

        best
    }

    /// Match and fold the embedding into the print's running average at
    /// high confidence
    pub fn match_with_auto_update(&self, embedding: &[f32]) -> Option<MatchResult> {
        let result = self.find_best_match(embedding);

        if let Some(ref m) = result {
            if m.confidence == MatchConfidence::High {
                if let Err(e) = self.update_embedding(&m.voiceprint.id, embedding) {
                    tracing::error!("VoicePrint embedding update failed: {}", e);
                }
            }
        }

        result
    }

    /// Add a new voice print; the embedding is normalized before storage
    pub fn add(&self, name: &str, embedding: Vec<f32>, source: Option<String>) -> Result<VoicePrint> {
        let now = chrono::Utc::now().to_rfc3339();

        let vp = VoicePrint {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            embedding: normalize_vector(&embedding),
            created_at: now.clone(),
            updated_at: now.clone(),
            last_seen_at: now,
            seen_count: 1,
            source,
        };

        {
            let mut data = self.data.write();
            data.voiceprints.push(vp.clone());
        }

        self.save()?;

        tracing::info!("VoicePrint added: {} ({})", vp.name, &vp.id[..8]);

        Ok(vp)
    }

    /// All voice prints (clone-on-read)
    pub fn list(&self) -> Vec<VoicePrint> {
        self.data.read().voiceprints.clone()
    }

    pub fn get(&self, id: &str) -> Option<VoicePrint> {
        self.data
            .read()
            .voiceprints
            .iter()
            .find(|vp| vp.id == id)
            .cloned()
    }

    pub fn update_name(&self, id: &str, name: &str) -> Result<()> {
        {
            let mut data = self.data.write();
            if let Some(vp) = data.voiceprints.iter_mut().find(|vp| vp.id == id) {
                vp.name = name.to_string();
                vp.updated_at = chrono::Utc::now().to_rfc3339();
            } else {
                anyhow::bail!("VoicePrint not found: {}", id);
            }
        }

        self.save()?;
        Ok(())
    }

    /// Fold a new observation into the running average, renormalize, and
    /// bump the use counter
    pub fn update_embedding(&self, id: &str, new_embedding: &[f32]) -> Result<()> {
        {
            let mut data = self.data.write();
            if let Some(vp) = data.voiceprints.iter_mut().find(|vp| vp.id == id) {
                // New observation gets weight 1, history up to 10
                let old_weight = (vp.seen_count.min(10)) as f32;
                let new_weight = 1.0f32;
                let total_weight = old_weight + new_weight;

                for (i, old_val) in vp.embedding.iter_mut().enumerate() {
                    if let Some(&new_val) = new_embedding.get(i) {
                        *old_val = (*old_val * old_weight + new_val * new_weight) / total_weight;
                    }
                }

                vp.embedding = normalize_vector(&vp.embedding);

                vp.seen_count += 1;
                let now = chrono::Utc::now().to_rfc3339();
                vp.last_seen_at = now.clone();
                vp.updated_at = now;

                tracing::info!(
                    "VoicePrint embedding updated: {} (seen_count={})",
                    vp.name,
                    vp.seen_count
                );
            } else {
                anyhow::bail!("VoicePrint not found: {}", id);
            }
        }

        self.save()?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let name = {
            let mut data = self.data.write();
            let idx = data.voiceprints.iter().position(|vp| vp.id == id);
            if let Some(i) = idx {
                let name = data.voiceprints[i].name.clone();
                data.voiceprints.remove(i);
                name
            } else {
                anyhow::bail!("VoicePrint not found: {}", id);
            }
        };

        self.save()?;
        tracing::info!("VoicePrint deleted: {} ({})", name, &id[..8]);

        Ok(())
    }

    pub fn count(&self) -> usize {
        self.data.read().voiceprints.len()
    }

    /// Atomic write-then-rename
    fn save(&self) -> Result<()> {
        let data = self.data.read();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

/// Cosine similarity between two vectors, in [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot_product: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;

    for i in 0..a.len() {
        let a_val = a[i] as f64;
        let b_val = b[i] as f64;
        dot_product += a_val * b_val;
        norm_a += a_val * a_val;
        norm_b += b_val * b_val;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Normalize a vector to unit L2 length
pub fn normalize_vector(v: &[f32]) -> Vec<f32> {
    let sum_sq: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum();

    if sum_sq < 1e-10 {
        return v.to_vec();
    }

    let norm = (1.0 / sum_sq.sqrt()) as f32;
    v.iter().map(|&x| x * norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, VoicePrintRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            VoicePrintRegistry::new(dir.path().to_path_buf(), VoicePrintThresholds::default())
                .unwrap();
        (dir, registry)
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_confidence_tiers() {
        let t = VoicePrintThresholds::default();
        assert_eq!(
            MatchConfidence::from_similarity(0.82, t),
            MatchConfidence::High
        );
        assert_eq!(
            MatchConfidence::from_similarity(0.60, t),
            MatchConfidence::Low
        );
        assert_eq!(
            MatchConfidence::from_similarity(0.40, t),
            MatchConfidence::None
        );
    }

    #[test]
    fn test_persisted_embeddings_are_unit_norm() {
        let (_dir, registry) = registry();
        registry.add("Alice", vec![3.0, 4.0], None).unwrap();

        let stored = &registry.list()[0];
        let norm: f32 = stored.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_high_confidence_match_auto_updates_once() {
        let (_dir, registry) = registry();
        let base = normalize_vector(&[1.0, 0.2, 0.1]);
        registry.add("Alice", base.clone(), None).unwrap();

        // Similar but not identical embedding, similarity well above 0.70
        let probe = normalize_vector(&[1.0, 0.25, 0.05]);
        let result = registry.match_with_auto_update(&probe).unwrap();

        assert_eq!(result.voiceprint.name, "Alice");
        assert_eq!(result.confidence, MatchConfidence::High);

        let updated = registry.get(&result.voiceprint.id).unwrap();
        assert_eq!(updated.seen_count, 2);
        let norm: f32 = updated.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_match_below_low_threshold() {
        let (_dir, registry) = registry();
        registry
            .add("Alice", normalize_vector(&[1.0, 0.0, 0.0]), None)
            .unwrap();

        let probe = normalize_vector(&[0.0, 1.0, 0.0]);
        assert!(registry.find_best_match(&probe).is_none());
    }

    #[test]
    fn test_registry_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let registry = VoicePrintRegistry::new(
                dir.path().to_path_buf(),
                VoicePrintThresholds::default(),
            )
            .unwrap();
            registry
                .add("Bob", normalize_vector(&[0.5, 0.5]), Some("sys".to_string()))
                .unwrap()
                .id
        };

        let reloaded =
            VoicePrintRegistry::new(dir.path().to_path_buf(), VoicePrintThresholds::default())
                .unwrap();
        let vp = reloaded.get(&id).unwrap();
        assert_eq!(vp.name, "Bob");
        assert_eq!(vp.source.as_deref(), Some("sys"));
    }

    #[test]
    fn test_delete_unknown_is_error() {
        let (_dir, registry) = registry();
        assert!(registry.delete("missing").is_err());
    }
}
