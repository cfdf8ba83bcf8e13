//! Tenant context resolution
//!
//! Extraction precedence (first present source wins): bearer-token
//! claim, `X-Tenant-Id` header, route param, query param, sub-domain
//! label. Whatever source wins must pass the v4-UUID format gate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sitevoice_core::{Error, FilterValue, Result};

/// Sub-domain labels never treated as tenants
pub const RESERVED_SUBDOMAINS: [&str; 4] = ["www", "api", "admin", "app"];

/// Where the tenant id was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    BearerClaim,
    Header,
    RouteParam,
    QueryParam,
    Subdomain,
    /// Optional resolution with no source present
    Anonymous,
}

/// Raw candidate values gathered from a request
#[derive(Debug, Clone, Default)]
pub struct TenantCandidates {
    /// `tenant_id` claim of a verified bearer token
    pub bearer_claim: Option<String>,
    /// `X-Tenant-Id` header value
    pub header: Option<String>,
    /// Route parameter
    pub route_param: Option<String>,
    /// Query parameter
    pub query_param: Option<String>,
    /// Request host, for sub-domain extraction
    pub host: Option<String>,
}

/// Resolution result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantResolution {
    /// Absent only for the anonymous sentinel
    pub tenant_id: Option<Uuid>,
    pub source: TenantSource,
}

impl TenantResolution {
    pub fn is_anonymous(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// Resolve the tenant context from request candidates
///
/// `required = true` turns an absent tenant into `MissingTenantId`;
/// otherwise the anonymous sentinel is produced.
pub fn resolve_tenant(candidates: &TenantCandidates, required: bool) -> Result<TenantResolution> {
    let picked = [
        (candidates.bearer_claim.as_deref(), TenantSource::BearerClaim),
        (candidates.header.as_deref(), TenantSource::Header),
        (candidates.route_param.as_deref(), TenantSource::RouteParam),
        (candidates.query_param.as_deref(), TenantSource::QueryParam),
        (subdomain_label(candidates.host.as_deref()), TenantSource::Subdomain),
    ]
    .into_iter()
    .find_map(|(value, source)| value.map(|v| (v.to_string(), source)));

    match picked {
        Some((raw, source)) => {
            let tenant_id = parse_tenant_uuid(&raw)?;
            Ok(TenantResolution { tenant_id: Some(tenant_id), source })
        },
        None if required => Err(Error::MissingTenantId),
        None => Ok(TenantResolution { tenant_id: None, source: TenantSource::Anonymous }),
    }
}

/// Validate the v4-UUID format gate
fn parse_tenant_uuid(raw: &str) -> Result<Uuid> {
    let parsed =
        Uuid::parse_str(raw.trim()).map_err(|_| Error::InvalidTenantId(raw.to_string()))?;
    if parsed.get_version_num() != 4 {
        return Err(Error::InvalidTenantId(raw.to_string()));
    }
    Ok(parsed)
}

/// First host label when it is a plausible tenant sub-domain
fn subdomain_label(host: Option<&str>) -> Option<&str> {
    let host = host?.split(':').next()?;
    let labels: Vec<&str> = host.split('.').collect();
    // tenant.example.com needs at least three labels.
    if labels.len() < 3 {
        return None;
    }
    let label = labels[0];
    if label.is_empty() || RESERVED_SUBDOMAINS.contains(&label) {
        return None;
    }
    Some(label)
}

/// Objects that carry their owning tenant
pub trait TenantOwned {
    fn tenant_id(&self) -> Uuid;
}

/// Tenant-scoped query helper
///
/// Attaches the tenant filter to downstream queries, validates ownership
/// of single objects and filters collections by owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: Uuid,
}

impl TenantScope {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// Filter predicate for downstream queries
    pub fn filter(&self) -> (&'static str, FilterValue) {
        ("tenant_id", FilterValue::String(self.tenant_id.to_string()))
    }

    /// Validate ownership of a single object
    pub fn check_owns<T: TenantOwned>(&self, object: &T) -> Result<()> {
        if object.tenant_id() != self.tenant_id {
            return Err(Error::Forbidden("object belongs to another tenant".to_string()));
        }
        Ok(())
    }

    /// Keep only objects owned by this tenant
    pub fn filter_owned<T: TenantOwned>(&self, objects: Vec<T>) -> Vec<T> {
        objects.into_iter().filter(|o| o.tenant_id() == self.tenant_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4() -> String {
        Uuid::new_v4().to_string()
    }

    #[test]
    fn test_precedence_bearer_over_header() {
        let bearer = v4();
        let header = v4();
        let resolution = resolve_tenant(
            &TenantCandidates {
                bearer_claim: Some(bearer.clone()),
                header: Some(header),
                ..Default::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(resolution.source, TenantSource::BearerClaim);
        assert_eq!(resolution.tenant_id.unwrap().to_string(), bearer);
    }

    #[test]
    fn test_precedence_header_over_query() {
        let header = v4();
        let resolution = resolve_tenant(
            &TenantCandidates {
                header: Some(header.clone()),
                query_param: Some(v4()),
                ..Default::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(resolution.source, TenantSource::Header);
        assert_eq!(resolution.tenant_id.unwrap().to_string(), header);
    }

    #[test]
    fn test_subdomain_extraction() {
        let tenant = v4();
        let resolution = resolve_tenant(
            &TenantCandidates {
                host: Some(format!("{}.sitevoice.dev:443", tenant)),
                ..Default::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(resolution.source, TenantSource::Subdomain);
        assert_eq!(resolution.tenant_id.unwrap().to_string(), tenant);
    }

    #[test]
    fn test_reserved_subdomains_ignored() {
        for label in RESERVED_SUBDOMAINS {
            let result = resolve_tenant(
                &TenantCandidates {
                    host: Some(format!("{}.sitevoice.dev", label)),
                    ..Default::default()
                },
                true,
            );
            assert!(matches!(result, Err(Error::MissingTenantId)), "label {}", label);
        }
        // A bare apex domain has no tenant label either.
        let result = resolve_tenant(
            &TenantCandidates { host: Some("sitevoice.dev".to_string()), ..Default::default() },
            true,
        );
        assert!(matches!(result, Err(Error::MissingTenantId)));
    }

    #[test]
    fn test_format_gate() {
        let result = resolve_tenant(
            &TenantCandidates { header: Some("not-a-uuid".to_string()), ..Default::default() },
            true,
        );
        assert!(matches!(result, Err(Error::InvalidTenantId(_))));

        // v1-style UUIDs fail the v4 gate.
        let result = resolve_tenant(
            &TenantCandidates {
                header: Some("c232ab00-9414-11ec-b3c8-9f68deced846".to_string()),
                ..Default::default()
            },
            true,
        );
        assert!(matches!(result, Err(Error::InvalidTenantId(_))));
    }

    #[test]
    fn test_optional_resolution_yields_anonymous() {
        let resolution = resolve_tenant(&TenantCandidates::default(), false).unwrap();
        assert!(resolution.is_anonymous());
        assert_eq!(resolution.source, TenantSource::Anonymous);

        let result = resolve_tenant(&TenantCandidates::default(), true);
        assert!(matches!(result, Err(Error::MissingTenantId)));
    }

    struct Owned {
        tenant_id: Uuid,
    }

    impl TenantOwned for Owned {
        fn tenant_id(&self) -> Uuid {
            self.tenant_id
        }
    }

    #[test]
    fn test_scope_ownership_and_filtering() {
        let tenant = Uuid::new_v4();
        let scope = TenantScope::new(tenant);

        let mine = Owned { tenant_id: tenant };
        let theirs = Owned { tenant_id: Uuid::new_v4() };
        assert!(scope.check_owns(&mine).is_ok());
        assert!(matches!(scope.check_owns(&theirs), Err(Error::Forbidden(_))));

        let kept = scope.filter_owned(vec![
            Owned { tenant_id: tenant },
            Owned { tenant_id: Uuid::new_v4() },
            Owned { tenant_id: tenant },
        ]);
        assert_eq!(kept.len(), 2);

        let (field, value) = scope.filter();
        assert_eq!(field, "tenant_id");
        assert_eq!(value, FilterValue::String(tenant.to_string()));
    }
}
