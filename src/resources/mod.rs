//! Resource resolution: internal resources staged from the repository,
//! external resources pinned to previously published artifacts.
//!
//! Resolution never copies bytes; the assembler does that once every
//! resource of an applet resolved.

pub mod external;
pub mod internal;

use crate::core::error::Result;
use crate::core::types::{AppletDecl, ExternalDependency, ResourceSpec, StagedFile};

pub use external::ExternalResolver;
pub use internal::InternalResolver;

/// Everything an applet's declaration resolved to.
#[derive(Debug, Clone, Default)]
pub struct ResolvedResources {
    pub internal: Vec<StagedFile>,
    pub external: Vec<ExternalDependency>,
}

/// Resolves both kinds of resource against their manifests.
pub struct ResourceResolver {
    pub internal: InternalResolver,
    pub external: ExternalResolver,
}

impl ResourceResolver {
    pub fn new(internal: InternalResolver, external: ExternalResolver) -> Self {
        Self { internal, external }
    }

    /// Resolve one request.
    pub fn resolve(&self, spec: &ResourceSpec, out: &mut ResolvedResources) -> Result<()> {
        match spec {
            ResourceSpec::Internal { category, name } => {
                out.internal
                    .extend(self.internal.resolve_internal(category, name)?);
            }
            ResourceSpec::External { name, version } => {
                out.external
                    .push(self.external.resolve_external(name, version.as_deref())?);
            }
        }
        Ok(())
    }

    /// Resolve every resource an applet declares. Fails on the first miss.
    pub fn resolve_decl(&self, applet: &str, decl: &AppletDecl) -> Result<ResolvedResources> {
        let mut out = ResolvedResources::default();
        for spec in decl.resource_specs() {
            tracing::debug!(applet, resource = %spec, "resolving resource");
            self.resolve(&spec, &mut out)?;
        }
        Ok(out)
    }
}
