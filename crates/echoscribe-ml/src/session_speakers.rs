//! Session speaker profiles
//!
//! Per-session speaker identity: diarization hands over one embedding
//! per locally-detected speaker, and this registry re-identifies them
//! against the speakers already seen in the session (so "speaker 2 of
//! chunk 7" stays "Interlocutor 1" when it is the same voice) and
//! against the global voice-print registry for cross-session names.

use crate::voiceprint::{cosine_similarity, normalize_vector, MatchConfidence, VoicePrintRegistry};
use anyhow::{Context, Result};
use echoscribe_types::{SessionSpeakerProfile, SpeakerEmbedding};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Minimum cosine similarity for same-session profile matching
const PROFILE_MATCH_THRESHOLD: f32 = 0.65;

/// Process-wide registry of per-session speaker profiles
pub struct SessionSpeakerRegistry {
    profiles: RwLock<HashMap<String, Vec<SessionSpeakerProfile>>>,
    voiceprints: Option<Arc<VoicePrintRegistry>>,
}

impl SessionSpeakerRegistry {
    pub fn new(voiceprints: Option<Arc<VoicePrintRegistry>>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            voiceprints,
        }
    }

    /// Process one diarization batch for a session.
    ///
    /// Returns the full `local speaker id -> session speaker id` map for
    /// the batch. Matches require cosine similarity >= 0.65 against an
    /// existing profile; unmatched embeddings open new profiles (which
    /// are then checked against the global voice-print registry).
    pub fn process_embeddings(
        &self,
        session_id: &str,
        batch: &[SpeakerEmbedding],
    ) -> HashMap<i32, i32> {
        let mut remap = HashMap::new();
        if batch.is_empty() {
            return remap;
        }

        let mut profiles = self.profiles.write();
        let session_profiles = profiles.entry(session_id.to_string()).or_default();

        for incoming in batch {
            let embedding = normalize_vector(&incoming.embedding);

            let best = session_profiles
                .iter()
                .enumerate()
                .map(|(i, p)| (i, cosine_similarity(&embedding, &p.embedding)))
                .filter(|(_, sim)| *sim >= PROFILE_MATCH_THRESHOLD)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((idx, similarity)) => {
                    let profile = &mut session_profiles[idx];
                    if profile.speaker_id != incoming.speaker {
                        tracing::debug!(
                            "Session {}: local speaker {} -> existing speaker {} (sim={:.2})",
                            session_id,
                            incoming.speaker,
                            profile.speaker_id,
                            similarity
                        );
                    }
                    remap.insert(incoming.speaker, profile.speaker_id);

                    // Fold the observation in, weighted by speech time
                    let old_weight = profile.total_duration.max(0.1) as f32;
                    let new_weight = incoming.duration.max(0.1) as f32;
                    let total = old_weight + new_weight;
                    for (i, v) in profile.embedding.iter_mut().enumerate() {
                        if let Some(&n) = embedding.get(i) {
                            *v = (*v * old_weight + n * new_weight) / total;
                        }
                    }
                    profile.embedding = normalize_vector(&profile.embedding);
                    profile.total_duration += incoming.duration;
                }
                None => {
                    let speaker_id = session_profiles
                        .iter()
                        .map(|p| p.speaker_id)
                        .max()
                        .unwrap_or(0)
                        + 1;

                    let mut profile = SessionSpeakerProfile {
                        session_id: session_id.to_string(),
                        speaker_id,
                        embedding: embedding.clone(),
                        total_duration: incoming.duration,
                        recognized_name: None,
                        voiceprint_id: None,
                    };

                    // New voice in this session: ask the global registry
                    if let Some(ref registry) = self.voiceprints {
                        if let Some(m) = registry.match_with_auto_update(&embedding) {
                            if m.confidence == MatchConfidence::High {
                                tracing::info!(
                                    "Session {}: speaker {} recognized as {} (sim={:.2})",
                                    session_id,
                                    speaker_id,
                                    m.voiceprint.name,
                                    m.similarity
                                );
                                profile.recognized_name = Some(m.voiceprint.name.clone());
                                profile.voiceprint_id = Some(m.voiceprint.id.clone());
                            }
                        }
                    }

                    remap.insert(incoming.speaker, speaker_id);
                    session_profiles.push(profile);
                }
            }
        }

        remap
    }

    /// Profiles of one session (clone-on-read)
    pub fn session_speakers(&self, session_id: &str) -> Vec<SessionSpeakerProfile> {
        self.profiles
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Reset a session's profiles (before a full re-transcription)
    pub fn clear_session_profiles(&self, session_id: &str) {
        self.profiles.write().remove(session_id);
        tracing::info!("Session {}: speaker profiles cleared", session_id);
    }

    /// Merge several profiles into one: embeddings averaged (weighted by
    /// speech time) and renormalized, durations summed, sources removed.
    pub fn merge_profiles(
        &self,
        session_id: &str,
        source_ids: &[i32],
        target_id: i32,
    ) -> Result<()> {
        let mut profiles = self.profiles.write();
        let session_profiles = profiles
            .get_mut(session_id)
            .with_context(|| format!("No profiles for session {}", session_id))?;

        let target_idx = session_profiles
            .iter()
            .position(|p| p.speaker_id == target_id)
            .with_context(|| format!("Target speaker {} not found", target_id))?;

        let mut acc: Vec<f64> = session_profiles[target_idx]
            .embedding
            .iter()
            .map(|&v| v as f64 * session_profiles[target_idx].total_duration.max(0.1))
            .collect();
        let mut total_duration = session_profiles[target_idx].total_duration;

        for &source_id in source_ids {
            if source_id == target_id {
                continue;
            }
            let Some(source) = session_profiles.iter().find(|p| p.speaker_id == source_id)
            else {
                continue;
            };
            let weight = source.total_duration.max(0.1);
            for (i, &v) in source.embedding.iter().enumerate() {
                if i < acc.len() {
                    acc[i] += v as f64 * weight;
                }
            }
            total_duration += source.total_duration;
        }

        let merged: Vec<f32> = acc.iter().map(|&v| v as f32).collect();
        session_profiles[target_idx].embedding = normalize_vector(&merged);
        session_profiles[target_idx].total_duration = total_duration;

        session_profiles.retain(|p| p.speaker_id == target_id || !source_ids.contains(&p.speaker_id));

        Ok(())
    }

    /// Rename a session speaker; optionally saves (or updates) a global
    /// voice print backed by the profile's embedding.
    pub fn rename_speaker(
        &self,
        session_id: &str,
        speaker_id: i32,
        new_name: &str,
        save_as_voiceprint: bool,
    ) -> Result<()> {
        let mut profiles = self.profiles.write();
        let session_profiles = profiles
            .get_mut(session_id)
            .with_context(|| format!("No profiles for session {}", session_id))?;

        let profile = session_profiles
            .iter_mut()
            .find(|p| p.speaker_id == speaker_id)
            .with_context(|| format!("Speaker {} not found in session {}", speaker_id, session_id))?;

        profile.recognized_name = Some(new_name.to_string());

        if save_as_voiceprint {
            if let Some(ref registry) = self.voiceprints {
                match &profile.voiceprint_id {
                    Some(id) => registry.update_name(id, new_name)?,
                    None => {
                        let vp = registry.add(
                            new_name,
                            profile.embedding.clone(),
                            Some("sys".to_string()),
                        )?;
                        profile.voiceprint_id = Some(vp.id);
                    }
                }
            }
        }

        Ok(())
    }

    /// Persist a session's profiles into its directory
    pub fn save_profiles(&self, session_id: &str, session_dir: &Path) -> Result<()> {
        let profiles = self.session_speakers(session_id);
        let path = session_dir.join("speaker_profiles.json");
        let content = serde_json::to_string_pretty(&profiles)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Load a session's profiles from its directory (no-op when absent)
    pub fn load_profiles(&self, session_id: &str, session_dir: &Path) -> Result<()> {
        let path = session_dir.join("speaker_profiles.json");
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        let profiles: Vec<SessionSpeakerProfile> =
            serde_json::from_str(&content).context("Failed to parse speaker_profiles.json")?;
        self.profiles
            .write()
            .insert(session_id.to_string(), profiles);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voiceprint::VoicePrintThresholds;

    fn embedding(speaker: i32, v: &[f32], duration: f64) -> SpeakerEmbedding {
        SpeakerEmbedding {
            speaker,
            embedding: normalize_vector(v),
            duration,
        }
    }

    #[test]
    fn test_first_batch_creates_one_profile_per_embedding() {
        let registry = SessionSpeakerRegistry::new(None);
        let batch = vec![
            embedding(0, &[1.0, 0.0, 0.0], 15.0),
            embedding(1, &[0.0, 1.0, 0.0], 15.0),
        ];

        let remap = registry.process_embeddings("s1", &batch);

        assert_eq!(remap.len(), 2);
        assert_eq!(remap[&0], 1);
        assert_eq!(remap[&1], 2);

        let profiles = registry.session_speakers("s1");
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].speaker_id, 1);
        assert_eq!(profiles[1].speaker_id, 2);
    }

    #[test]
    fn test_matched_profiles_meet_similarity_floor() {
        let registry = SessionSpeakerRegistry::new(None);
        registry.process_embeddings("s1", &[embedding(0, &[1.0, 0.1, 0.0], 10.0)]);

        // Close to profile 1, far from anything else
        let batch = vec![embedding(3, &[1.0, 0.15, 0.02], 8.0)];
        let remap = registry.process_embeddings("s1", &batch);

        assert_eq!(remap[&3], 1);
        let profile = &registry.session_speakers("s1")[0];
        let sim = cosine_similarity(&normalize_vector(&[1.0, 0.15, 0.02]), &profile.embedding);
        assert!(sim >= PROFILE_MATCH_THRESHOLD);
        assert!((profile.total_duration - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_dissimilar_embedding_opens_new_profile() {
        let registry = SessionSpeakerRegistry::new(None);
        registry.process_embeddings("s1", &[embedding(0, &[1.0, 0.0, 0.0], 10.0)]);

        let remap = registry.process_embeddings("s1", &[embedding(0, &[0.0, 1.0, 0.0], 5.0)]);
        assert_eq!(remap[&0], 2);
        assert_eq!(registry.session_speakers("s1").len(), 2);
    }

    #[test]
    fn test_clear_and_replay_reproduces_profiles() {
        let registry = SessionSpeakerRegistry::new(None);
        let batch = vec![
            embedding(0, &[1.0, 0.0, 0.0], 15.0),
            embedding(1, &[0.0, 1.0, 0.0], 12.0),
        ];

        registry.process_embeddings("s1", &batch);
        let before = registry.session_speakers("s1");

        registry.clear_session_profiles("s1");
        assert!(registry.session_speakers("s1").is_empty());

        registry.process_embeddings("s1", &batch);
        let after = registry.session_speakers("s1");

        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.speaker_id, a.speaker_id);
            assert!((cosine_similarity(&b.embedding, &a.embedding) - 1.0).abs() < 1e-6);
            assert!((b.total_duration - a.total_duration).abs() < 1e-9);
        }
    }

    #[test]
    fn test_voiceprint_recognition_on_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let voiceprints = Arc::new(
            VoicePrintRegistry::new(dir.path().to_path_buf(), VoicePrintThresholds::default())
                .unwrap(),
        );
        let alice = voiceprints
            .add("Alice", normalize_vector(&[1.0, 0.2, 0.1]), None)
            .unwrap();

        let registry = SessionSpeakerRegistry::new(Some(voiceprints.clone()));

        // Similarity to Alice's print is well above the high threshold
        let remap =
            registry.process_embeddings("s1", &[embedding(0, &[1.0, 0.25, 0.05], 20.0)]);
        assert_eq!(remap[&0], 1);

        let profiles = registry.session_speakers("s1");
        assert_eq!(profiles[0].recognized_name.as_deref(), Some("Alice"));
        assert_eq!(profiles[0].voiceprint_id.as_deref(), Some(alice.id.as_str()));

        // The print's running average was updated exactly once
        assert_eq!(voiceprints.get(&alice.id).unwrap().seen_count, 2);
    }

    #[test]
    fn test_merge_profiles_sums_durations_and_renormalizes() {
        let registry = SessionSpeakerRegistry::new(None);
        registry.process_embeddings(
            "s1",
            &[
                embedding(0, &[1.0, 0.0, 0.0], 10.0),
                embedding(1, &[0.0, 1.0, 0.0], 6.0),
            ],
        );

        registry.merge_profiles("s1", &[2], 1).unwrap();

        let profiles = registry.session_speakers("s1");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].speaker_id, 1);
        assert!((profiles[0].total_duration - 16.0).abs() < 1e-9);
        let norm: f32 = profiles[0].embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_profiles_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionSpeakerRegistry::new(None);
        registry.process_embeddings("s1", &[embedding(0, &[0.6, 0.8], 9.0)]);
        registry.save_profiles("s1", dir.path()).unwrap();

        let fresh = SessionSpeakerRegistry::new(None);
        fresh.load_profiles("s1", dir.path()).unwrap();
        let profiles = fresh.session_speakers("s1");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].speaker_id, 1);
        assert!((profiles[0].total_duration - 9.0).abs() < 1e-9);
    }
}
