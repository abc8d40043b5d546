//! Model allow-list and upload gate
//!
//! Results produced by an unverified model or with non-standard segmentation
//! must not be written back to shared stores. [`UploadPolicy::allow_upload`]
//! checks the translator's segmentation settings and the model reported by
//! the backend, and returns the verdict together with a human-readable reason.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::ModelInfo;
use crate::models::BackendId;

type Meta = serde_json::Map<String, serde_json::Value>;

/// An allow-listed model build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedModel {
    pub repo: String,
    pub file: String,
    /// Fields the backend-reported metadata must match exactly
    #[serde(default)]
    pub meta: Meta,
}

/// Model detected on the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedModel {
    /// Id as reported by the backend
    pub id: String,
    /// Normalized id used for allow-list lookups
    pub normalized_id: String,
    /// `major.minor` parsed from the id
    pub version: String,
    pub meta: Option<Meta>,
}

impl DetectedModel {
    pub fn from_info(info: ModelInfo) -> Self {
        let normalized_id = normalize_model_id(&info.id);
        let version = infer_version(&normalized_id);
        Self {
            id: info.id,
            normalized_id,
            version,
            meta: info.meta,
        }
    }
}

/// Verdict of the upload gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDecision {
    pub allowed: bool,
    pub reason: String,
}

impl UploadDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Upload gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Required segment length, if enforced
    pub expected_seg_length: Option<usize>,
    /// Required previous-context length, if enforced
    pub expected_prev_seg_length: Option<usize>,
    /// Block when the backend model cannot be determined
    pub require_model_info: bool,
    /// Block models outside the allow-list and patterns
    pub require_model_in_allow_list: bool,
    /// Compare allow-list metadata field by field
    pub require_meta_exact_match: bool,
    /// Normalized model id -> allowed build
    pub allow_models: BTreeMap<String, AllowedModel>,
    /// Case-insensitive patterns matched against the normalized id
    pub allow_patterns: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            expected_seg_length: None,
            expected_prev_seg_length: None,
            require_model_info: false,
            require_model_in_allow_list: false,
            require_meta_exact_match: false,
            allow_models: BTreeMap::new(),
            allow_patterns: Vec::new(),
        }
    }
}

impl UploadPolicy {
    /// Policy for a backend: strict for murasaki, open for the others
    pub fn for_backend(backend: BackendId) -> Self {
        match backend {
            BackendId::Murasaki => Self::murasaki(),
            BackendId::Sakura | BackendId::Gpt => Self::default(),
        }
    }

    /// Murasaki allow-list policy
    pub fn murasaki() -> Self {
        let repo = "Murasaki-Project/Murasaki-14B-v0.2-GGUF";
        let meta = |size: u64| {
            serde_json::json!({
                "n_vocab": 151936,
                "n_ctx_train": 32768,
                "n_embd": 5120,
                "size": size,
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        };

        let mut allow_models = BTreeMap::new();
        allow_models.insert(
            "murasaki-14b-v0.2-iq4_xs".to_string(),
            AllowedModel {
                repo: repo.to_string(),
                file: "Murasaki-14B-v0.2-IQ4_XS.gguf".to_string(),
                meta: meta(8_104_770_560),
            },
        );
        allow_models.insert(
            "murasaki-14b-v0.2-q6_k".to_string(),
            AllowedModel {
                repo: repo.to_string(),
                file: "Murasaki-14B-v0.2-Q6_K.gguf".to_string(),
                meta: meta(12_121_937_216),
            },
        );

        Self {
            expected_seg_length: Some(1000),
            expected_prev_seg_length: Some(0),
            require_model_info: true,
            require_model_in_allow_list: true,
            require_meta_exact_match: true,
            allow_models,
            allow_patterns: vec![r"^(murasaki-14b-v0\.2-iq4_xs|murasaki-14b-v0\.2-q6_k)$".to_string()],
        }
    }

    fn matches_pattern(&self, normalized_id: &str) -> bool {
        self.allow_patterns.iter().any(|pattern| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(normalized_id),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Ignoring invalid allow pattern");
                    false
                }
            }
        })
    }

    /// Decide whether results may be uploaded
    pub fn allow_upload(
        &self,
        seg_length: usize,
        prev_seg_length: usize,
        model: Option<&DetectedModel>,
    ) -> UploadDecision {
        if let Some(expected) = self.expected_seg_length {
            if seg_length != expected {
                return UploadDecision::block(format!("分段长度不是{expected}"));
            }
        }
        if let Some(expected) = self.expected_prev_seg_length {
            if prev_seg_length != expected {
                return UploadDecision::block(format!("前文长度不是{expected}"));
            }
        }

        let Some(model) = model else {
            return if self.require_model_info {
                UploadDecision::block("无法获取模型数据")
            } else {
                UploadDecision::allow("无法获取模型数据，按宽松策略允许上传")
            };
        };

        let allowed = self.allow_models.get(&model.normalized_id);
        let in_allow_list = allowed.is_some() || self.matches_pattern(&model.normalized_id);
        if self.require_model_in_allow_list && !in_allow_list {
            return UploadDecision::block(format!("模型为{}，禁止上传", model.id));
        }

        if self.require_meta_exact_match {
            if let Some(entry) = allowed {
                let current = model.meta.as_ref();
                let mismatch = entry
                    .meta
                    .iter()
                    .any(|(key, value)| current.and_then(|m| m.get(key)) != Some(value));
                if mismatch {
                    return UploadDecision::block("模型检查未通过，不要尝试欺骗模型检查");
                }
            }
        }

        UploadDecision::allow(format!("模型为{}，允许上传", model.id))
    }
}

/// Normalize a backend model id for allow-list lookups
///
/// Trims, strips a `.gguf` suffix and the `Murasaki-Project/` namespace
/// (both case-insensitive), then lower-cases.
pub fn normalize_model_id(id: &str) -> String {
    let mut id = id.trim();
    if id.len() >= 5 && id.is_char_boundary(id.len() - 5) {
        let (head, tail) = id.split_at(id.len() - 5);
        if tail.eq_ignore_ascii_case(".gguf") {
            id = head;
        }
    }
    const PREFIX: &str = "murasaki-project/";
    if id.len() >= PREFIX.len()
        && id.is_char_boundary(PREFIX.len())
        && id[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
    {
        id = &id[PREFIX.len()..];
    }
    id.to_lowercase()
}

/// `major.minor` after a `v` in the id, `1.0` when absent
pub fn infer_version(id: &str) -> String {
    static VERSION_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = VERSION_RE
        .get_or_init(|| regex::Regex::new(r"v(\d+\.\d+)").expect("Invalid regex pattern"));

    re.captures(id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "1.0".to_string())
}
