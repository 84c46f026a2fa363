//! Routing core: resolves an input reference to raw files, dispatches each to
//! a processor, and falls back between the local pipeline and the remote
//! service according to the preference mode.
//!
//! Expected conversion failures become error artifacts; the only fatal errors
//! a call can return are configuration mistakes caught before any work starts
//! (malformed option syntax, `service-only` without a configured service).

use crate::artifact::Artifact;
use crate::capability::CapabilityRegistry;
use crate::config::{Config, PreferenceMode};
use crate::dsl::{DslError, Options, parse_dsl};
use crate::processor::ProcessorRegistry;
use crate::service::{ServiceClient, ServiceError};
use crate::source::{SourceRecord, SourceRegistry};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Substrings that mark a local error artifact as a missing-dependency
/// failure, and therefore eligible for one service retry. Matched
/// case-insensitively against `flags.error`.
pub const MISSING_DEP_MARKERS: &[&str] = &[
    "not installed",
    "requires",
    "unavailable",
    "not enabled",
    "no module named",
    "importerror",
];

/// Fatal routing errors, raised before any conversion work begins.
#[derive(Debug, Error)]
pub enum RouterError {
    /// `service-only` was requested but no service endpoint/key is set.
    #[error("prefer=service-only requires a configured service endpoint and API key")]
    ServiceNotConfigured,
    /// The inline option block could not be parsed.
    #[error(transparent)]
    Dsl(#[from] DslError),
}

/// The conversion pipeline: registries, optional service client, and the
/// default preference mode.
pub struct Router {
    sources: SourceRegistry,
    processors: ProcessorRegistry,
    capabilities: CapabilityRegistry,
    service: Option<ServiceClient>,
    prefer: PreferenceMode,
}

impl Router {
    /// Build a router around explicit registries, with no service client.
    pub fn new(
        sources: SourceRegistry,
        processors: ProcessorRegistry,
        capabilities: CapabilityRegistry,
    ) -> Self {
        Self {
            sources,
            processors,
            capabilities,
            service: None,
            prefer: PreferenceMode::Local,
        }
    }

    /// Build a fully-wired router from configuration: default registries,
    /// plus a service client when an API key is configured.
    pub fn from_config(config: &Config) -> Self {
        let mut router = Self::new(
            SourceRegistry::with_defaults(config),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        router.prefer = config.prefer;
        router.service = ServiceClient::from_config(config);
        router
    }

    /// Attach (or replace) the service client.
    pub fn set_service(&mut self, service: Option<ServiceClient>) {
        self.service = service;
    }

    /// Mutable access to the source registry, for registering handlers.
    pub fn sources_mut(&mut self) -> &mut SourceRegistry {
        &mut self.sources
    }

    /// Mutable access to the processor registry.
    pub fn processors_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.processors
    }

    /// The capability registry backing local-attempt eligibility checks.
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// The processor registry, for format listings.
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Convert one input reference into artifacts, one per resolved file.
    ///
    /// `extra` options override same-named options parsed from the inline
    /// `[key: value]` block. `prefer` overrides the configured default mode.
    pub async fn process(
        &self,
        input: &str,
        extra: &Options,
        prefer: Option<PreferenceMode>,
    ) -> Result<Vec<Artifact>, RouterError> {
        let mode = prefer.unwrap_or(self.prefer);
        let (reference, mut options) = parse_dsl(input)?;
        for (key, value) in extra {
            options.insert(key.clone(), value.clone());
        }
        let reference = apply_source_options(&reference, &options);

        if mode == PreferenceMode::ServiceOnly && self.service.is_none() {
            return Err(RouterError::ServiceNotConfigured);
        }

        info!(input = %reference, mode = %mode, "processing input");
        let records = match self.resolve(&reference, mode).await {
            Ok(records) => records,
            Err(message) => return Ok(vec![Artifact::error(&reference, message)]),
        };
        if records.is_empty() {
            return Ok(vec![Artifact::note(&reference, "no files resolved")]);
        }

        let mut artifacts = Vec::with_capacity(records.len());
        for record in &records {
            let artifact = self
                .process_bytes(&record.filename, &record.bytes, &options, mode)
                .await;
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    /// Convert already-resolved bytes. This is the per-file half of
    /// [`Router::process`]; the self-hosted server calls it directly.
    pub async fn process_bytes(
        &self,
        filename: &str,
        data: &[u8],
        options: &Options,
        mode: PreferenceMode,
    ) -> Artifact {
        let artifact = match mode {
            PreferenceMode::LocalOnly => self.local_attempt(filename, data, options),
            PreferenceMode::Local => self.local_then_service(filename, data, options).await,
            PreferenceMode::Service => self.service_then_local(filename, data, options).await,
            PreferenceMode::ServiceOnly => match &self.service {
                Some(service) => match service.process(filename, data, options).await {
                    Ok(artifact) => artifact.via_service(),
                    Err(err) => Artifact::error(filename, err.to_string()),
                },
                None => Artifact::error(
                    filename,
                    "prefer=service-only requires a configured service",
                ),
            },
        };
        artifact.stamped(filename)
    }

    /// Resolve a reference with the local handlers only. The self-hosted
    /// server's unpack endpoint is built on this.
    pub async fn resolve_local(
        &self,
        reference: &str,
    ) -> Result<Vec<SourceRecord>, crate::source::SourceError> {
        self.sources.resolve(reference).await
    }

    /// Resolve a reference to raw files, falling back to the remote unpack
    /// endpoint when local resolution fails and the mode permits it.
    ///
    /// Resolution always tries the local handlers first, in every mode: the
    /// preference constrains who converts the bytes, not who reads a path
    /// only this machine can see.
    async fn resolve(
        &self,
        reference: &str,
        mode: PreferenceMode,
    ) -> Result<Vec<SourceRecord>, String> {
        match self.sources.resolve(reference).await {
            Ok(records) => Ok(records),
            Err(local_err) => {
                warn!(reference, error = %local_err, "local resolution failed");
                if mode == PreferenceMode::LocalOnly {
                    return Err(format!("failed to resolve '{reference}': {local_err}"));
                }
                match &self.service {
                    Some(service) => match service.unpack(reference).await {
                        Ok(records) => {
                            debug!(reference, files = records.len(), "resolved via service");
                            Ok(records)
                        }
                        Err(service_err) => Err(format!(
                            "failed to resolve '{reference}': {local_err}; service unpack \
                             failed: {service_err}"
                        )),
                    },
                    None => Err(format!("failed to resolve '{reference}': {local_err}")),
                }
            }
        }
    }

    /// Local pipeline only. Missing processors and conversion failures come
    /// back as error artifacts.
    fn local_attempt(&self, filename: &str, data: &[u8], options: &Options) -> Artifact {
        match self.processors.route(filename, data) {
            Some(processor) => processor.process(data, options),
            None => Artifact::error(filename, format!("no processor for '{filename}'")),
        }
    }

    /// Local first; one service retry when the local attempt failed for lack
    /// of a dependency.
    async fn local_then_service(
        &self,
        filename: &str,
        data: &[u8],
        options: &Options,
    ) -> Artifact {
        if let Some(service) = &self.service
            && !self.capability_available(filename, data)
        {
            // The local attempt is known to fail before we try it.
            debug!(filename, "capability unavailable locally, going to service");
            match service.process(filename, data, options).await {
                Ok(artifact) => return artifact.via_service(),
                Err(err) => {
                    warn!(filename, error = %err, "service attempt failed");
                    return Artifact::error(filename, err.to_string());
                }
            }
        }

        let local = self.local_attempt(filename, data, options);
        let Some(service) = &self.service else {
            return local;
        };
        if !is_missing_dep_error(&local) {
            return local;
        }

        debug!(filename, "local missing-dependency failure, retrying via service");
        match service.process(filename, data, options).await {
            Ok(artifact) => artifact.via_service(),
            Err(err) => {
                warn!(filename, error = %err, "service retry failed, keeping local error");
                let mut local = local;
                local.flags.insert(
                    "service_error".into(),
                    serde_json::Value::String(err.to_string()),
                );
                local
            }
        }
    }

    /// Service first; any service failure falls back to the local pipeline.
    async fn service_then_local(
        &self,
        filename: &str,
        data: &[u8],
        options: &Options,
    ) -> Artifact {
        let Some(service) = &self.service else {
            return self.local_attempt(filename, data, options);
        };
        match service.process(filename, data, options).await {
            Ok(artifact) => artifact.via_service(),
            Err(err) => {
                warn!(filename, error = %err, "service failed, falling back to local");
                if self.processors.route(filename, data).is_none() {
                    // Nothing local to fall back to; the service failure is
                    // the whole story.
                    return Artifact::error(filename, err.to_string());
                }
                self.local_attempt(filename, data, options)
            }
        }
    }

    /// Whether the processor this file would route to has its dependency
    /// group available. Files with no capability group, and groups nobody
    /// registered a probe for, are always eligible for a local attempt.
    fn capability_available(&self, filename: &str, data: &[u8]) -> bool {
        let Some(processor) = self.processors.route(filename, data) else {
            return true;
        };
        let Some(group) = processor.capability() else {
            return true;
        };
        if !self.capabilities.known(group) {
            return true;
        }
        self.capabilities.check(group).available
    }
}

/// Rewrite the reference per source-directed options. Today that is the
/// `ref` option, folded into repository references as a `?ref=` query so the
/// handler (local or remote) checks out the right revision.
fn apply_source_options(reference: &str, options: &Options) -> String {
    let is_repo =
        reference.starts_with("github://") || reference.starts_with("https://github.com/");
    if !is_repo || reference.contains("?ref=") {
        return reference.to_string();
    }
    match options.get("ref").and_then(|value| value.as_str()) {
        Some(revision) => format!("{reference}?ref={revision}"),
        None => reference.to_string(),
    }
}

/// Whether an error artifact describes a missing local dependency.
fn is_missing_dep_error(artifact: &Artifact) -> bool {
    let Some(error) = artifact.error_flag() else {
        return false;
    };
    let error = error.to_lowercase();
    MISSING_DEP_MARKERS
        .iter()
        .any(|marker| error.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::OptionValue;

    #[test]
    fn missing_dep_markers_match_case_insensitively() {
        let artifact = Artifact::error("x.pdf", "pdf support REQUIRES the 'pdf' feature");
        assert!(is_missing_dep_error(&artifact));

        let benign = Artifact::error("x.pdf", "failed to parse pdf: bad xref");
        assert!(!is_missing_dep_error(&benign));

        let clean = Artifact::text("fine", serde_json::Map::new());
        assert!(!is_missing_dep_error(&clean));
    }

    #[test]
    fn ref_option_rewrites_repo_references_only() {
        let mut options = Options::new();
        options.insert("ref".into(), OptionValue::Str("v2.1".into()));

        assert_eq!(
            apply_source_options("github://owner/repo", &options),
            "github://owner/repo?ref=v2.1"
        );
        assert_eq!(
            apply_source_options("https://example.com/a.pdf", &options),
            "https://example.com/a.pdf"
        );
        // An existing ref query wins over the option.
        assert_eq!(
            apply_source_options("github://owner/repo?ref=main", &options),
            "github://owner/repo?ref=main"
        );
    }

    #[tokio::test]
    async fn service_only_without_service_fails_before_any_work() {
        let router = Router::new(
            SourceRegistry::new(),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        let err = router
            .process(
                "whatever.txt",
                &Options::new(),
                Some(PreferenceMode::ServiceOnly),
            )
            .await
            .expect_err("must fail fast");
        assert!(matches!(err, RouterError::ServiceNotConfigured));
    }

    #[tokio::test]
    async fn malformed_dsl_is_fatal() {
        let router = Router::new(
            SourceRegistry::new(),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        let err = router
            .process("doc.pdf[pages 1-3]", &Options::new(), None)
            .await
            .expect_err("missing separator");
        assert!(matches!(err, RouterError::Dsl(_)));
    }

    #[tokio::test]
    async fn unresolvable_input_becomes_error_artifact() {
        let router = Router::new(
            SourceRegistry::new(),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        let artifacts = router
            .process("/nonexistent/path/file.txt", &Options::new(), None)
            .await
            .expect("resolution failure is not fatal");
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].error_flag().is_some());
    }

    #[tokio::test]
    async fn explicit_options_override_inline_ones() {
        let router = Router::new(
            SourceRegistry::new(),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        let mut extra = Options::new();
        extra.insert("ref".into(), OptionValue::Str("override".into()));
        // The inline block parses, the explicit ref wins, and the rewrite
        // lands on the reference before resolution.
        let artifacts = router
            .process("github://owner/repo[ref: inline]", &extra, None)
            .await
            .expect("not fatal");
        // No handlers registered, so resolution fails; the error artifact
        // carries the rewritten reference as its source.
        let source = artifacts[0].flags["source"].as_str().unwrap_or_default();
        assert_eq!(source, "github://owner/repo?ref=override");
    }
}
