//! FHIR resource kinds and their reference capability table
//!
//! Resource bodies are kept as opaque JSON so that elements the engine does not
//! understand travel to the Query Directory untouched. What the engine does need
//! to know about a kind (which elements hold references, which one names the
//! owning organization) lives in the static tables on [`ResourceKind`].

use super::errors::AddressBookError;
use super::ids::{Ura, URA_SYSTEM};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// The six resource types that make up an organization graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Organization,
    Location,
    HealthcareService,
    Endpoint,
    Practitioner,
    PractitionerRole,
}

/// Path to an element holding a `Reference` (or an array of them)
///
/// Intermediate path segments may be arrays; every element is visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceField {
    pub path: &'static [&'static str],
}

impl ReferenceField {
    const fn new(path: &'static [&'static str]) -> Self {
        Self { path }
    }

    /// Dotted element name, e.g. `qualification.issuer`
    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

const ORGANIZATION_REFERENCES: &[ReferenceField] = &[
    ReferenceField::new(&["partOf"]),
    ReferenceField::new(&["endpoint"]),
];
const LOCATION_REFERENCES: &[ReferenceField] = &[
    ReferenceField::new(&["managingOrganization"]),
    ReferenceField::new(&["partOf"]),
    ReferenceField::new(&["endpoint"]),
];
const HEALTHCARE_SERVICE_REFERENCES: &[ReferenceField] = &[
    ReferenceField::new(&["providedBy"]),
    ReferenceField::new(&["location"]),
    ReferenceField::new(&["coverageArea"]),
    ReferenceField::new(&["endpoint"]),
];
const ENDPOINT_REFERENCES: &[ReferenceField] = &[ReferenceField::new(&["managingOrganization"])];
const PRACTITIONER_REFERENCES: &[ReferenceField] =
    &[ReferenceField::new(&["qualification", "issuer"])];
const PRACTITIONER_ROLE_REFERENCES: &[ReferenceField] = &[
    ReferenceField::new(&["practitioner"]),
    ReferenceField::new(&["organization"]),
    ReferenceField::new(&["location"]),
    ReferenceField::new(&["healthcareService"]),
    ReferenceField::new(&["endpoint"]),
];

impl ResourceKind {
    /// Every kind, in the order history is pulled from a source
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Organization,
        ResourceKind::Endpoint,
        ResourceKind::Location,
        ResourceKind::HealthcareService,
        ResourceKind::Practitioner,
        ResourceKind::PractitionerRole,
    ];

    /// FHIR resourceType name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Organization => "Organization",
            ResourceKind::Location => "Location",
            ResourceKind::HealthcareService => "HealthcareService",
            ResourceKind::Endpoint => "Endpoint",
            ResourceKind::Practitioner => "Practitioner",
            ResourceKind::PractitionerRole => "PractitionerRole",
        }
    }

    /// Elements of this kind that reference other resources
    pub fn reference_fields(&self) -> &'static [ReferenceField] {
        match self {
            ResourceKind::Organization => ORGANIZATION_REFERENCES,
            ResourceKind::Location => LOCATION_REFERENCES,
            ResourceKind::HealthcareService => HEALTHCARE_SERVICE_REFERENCES,
            ResourceKind::Endpoint => ENDPOINT_REFERENCES,
            ResourceKind::Practitioner => PRACTITIONER_REFERENCES,
            ResourceKind::PractitionerRole => PRACTITIONER_ROLE_REFERENCES,
        }
    }

    /// Element naming the owning Organization, if this kind has an owner
    pub fn owner_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Organization => Some("partOf"),
            ResourceKind::Location => Some("managingOrganization"),
            ResourceKind::HealthcareService => Some("providedBy"),
            ResourceKind::PractitionerRole => Some("organization"),
            ResourceKind::Endpoint | ResourceKind::Practitioner => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Organization" => Ok(ResourceKind::Organization),
            "Location" => Ok(ResourceKind::Location),
            "HealthcareService" => Ok(ResourceKind::HealthcareService),
            "Endpoint" => Ok(ResourceKind::Endpoint),
            "Practitioner" => Ok(ResourceKind::Practitioner),
            "PractitionerRole" => Ok(ResourceKind::PractitionerRole),
            other => Err(format!("Unsupported resource type: {other}")),
        }
    }
}

fn literal_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Z][A-Za-z]{1,63})/([A-Za-z0-9\-\.]{1,128})$")
            .expect("literal reference pattern is valid")
    })
}

/// A `Kind/id` pair, local to whichever server the containing record lives on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Parses a relative literal reference such as `Organization/123`.
    ///
    /// Absolute URLs, fragments, `urn:` references and unsupported types yield `None`.
    pub fn parse(reference: &str) -> Option<Self> {
        let captures = literal_reference_pattern().captures(reference)?;
        let kind = ResourceKind::from_str(&captures[1]).ok()?;
        Some(Self::new(kind, &captures[2]))
    }

    /// Relative reference string, `Kind/id`
    pub fn to_reference(&self) -> String {
        format!("{}/{}", self.kind, self.id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A resource of one of the supported kinds
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    kind: ResourceKind,
    body: Map<String, Value>,
}

impl Resource {
    /// Wraps a JSON resource, checking it is an object of a supported type.
    pub fn from_json(value: Value) -> Result<Self, AddressBookError> {
        let Value::Object(body) = value else {
            return Err(AddressBookError::Validation(
                "Resource is not a JSON object".to_string(),
            ));
        };
        let kind = body
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| AddressBookError::Validation("Resource has no resourceType".to_string()))
            .and_then(|name| ResourceKind::from_str(name).map_err(AddressBookError::Validation))?;
        Ok(Self { kind, body })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    /// `Kind/id` of this resource on the server it was read from
    pub fn local_ref(&self) -> Option<ResourceRef> {
        self.id().map(|id| ResourceRef::new(self.kind, id))
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.body)
    }

    pub fn name(&self) -> Option<&str> {
        self.body.get("name").and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: &str) {
        self.body
            .insert("name".to_string(), Value::String(name.to_string()));
    }

    /// URA identifier value, if present
    pub fn ura(&self) -> Option<Ura> {
        self.body
            .get("identifier")
            .and_then(Value::as_array)?
            .iter()
            .filter(|identifier| {
                identifier.get("system").and_then(Value::as_str) == Some(URA_SYSTEM)
            })
            .find_map(|identifier| identifier.get("value").and_then(Value::as_str))
            .and_then(|value| Ura::new(value).ok())
    }

    /// Replaces every URA identifier with the given one.
    pub fn set_ura(&mut self, ura: &Ura) {
        let mut identifiers: Vec<Value> = self
            .body
            .get("identifier")
            .and_then(Value::as_array)
            .map(|identifiers| {
                identifiers
                    .iter()
                    .filter(|identifier| {
                        identifier.get("system").and_then(Value::as_str) != Some(URA_SYSTEM)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        identifiers.push(serde_json::json!({
            "system": URA_SYSTEM,
            "value": ura.as_str(),
        }));
        self.body
            .insert("identifier".to_string(), Value::Array(identifiers));
    }

    /// Whether the owner element is present at all, resolvable or not
    pub fn has_owner_element(&self) -> bool {
        self.kind
            .owner_field()
            .is_some_and(|field| self.body.contains_key(field))
    }

    /// The owning organization, when the owner element is a literal reference
    pub fn owner(&self) -> Option<ResourceRef> {
        let field = self.kind.owner_field()?;
        self.body
            .get(field)
            .and_then(|owner| owner.get("reference"))
            .and_then(Value::as_str)
            .and_then(ResourceRef::parse)
    }

    /// Literal references held in one reference element
    pub fn references(&self, field: &ReferenceField) -> Vec<ResourceRef> {
        let mut slots = Vec::new();
        collect_slots(&self.body, field.path, &mut slots);

        let mut references = Vec::new();
        for slot in slots {
            match slot {
                Value::Array(items) => references.extend(items.iter().filter_map(literal_of)),
                other => references.extend(literal_of(other)),
            }
        }
        references
    }

    /// Literal references held in every reference element of this kind
    pub fn all_references(&self) -> Vec<ResourceRef> {
        self.kind
            .reference_fields()
            .iter()
            .flat_map(|field| self.references(field))
            .collect()
    }

    /// Rewrites every reference element of this kind.
    ///
    /// `resolve` maps a source-local reference to its replacement. Unresolved
    /// references lose their `reference`; a Reference left without `identifier`
    /// or `display` is removed, and so is an array that ends up empty.
    pub fn rewrite_references<F>(&mut self, resolve: F)
    where
        F: Fn(&ResourceRef) -> Option<String>,
    {
        let resolve_raw =
            |raw: &str| ResourceRef::parse(raw).and_then(|target| resolve(&target));
        for field in self.kind.reference_fields() {
            rewrite_slots(&mut self.body, field.path, &resolve_raw);
        }
    }

    /// Removes references to any of `targets`, with the same drop policy as
    /// [`Resource::rewrite_references`]. Other references are left as they are.
    pub fn drop_references(&mut self, targets: &HashSet<ResourceRef>) {
        let keep = |raw: &str| match ResourceRef::parse(raw) {
            Some(target) if targets.contains(&target) => None,
            _ => Some(raw.to_string()),
        };
        for field in self.kind.reference_fields() {
            rewrite_slots(&mut self.body, field.path, &keep);
        }
    }

    /// Provenance tag (`meta.source`)
    pub fn provenance(&self) -> Option<&str> {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("source"))
            .and_then(Value::as_str)
    }

    pub fn set_provenance(&mut self, provenance: &str) {
        if !matches!(self.body.get("meta"), Some(Value::Object(_))) {
            self.body
                .insert("meta".to_string(), Value::Object(Map::new()));
        }
        if let Some(Value::Object(meta)) = self.body.get_mut("meta") {
            meta.insert("source".to_string(), Value::String(provenance.to_string()));
        }
    }

    /// Profiles declared in `meta.profile`
    pub fn profiles(&self) -> Vec<&str> {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("profile"))
            .and_then(Value::as_array)
            .map(|profiles| profiles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn set_id(&mut self, id: &str) {
        self.body
            .insert("id".to_string(), Value::String(id.to_string()));
    }

    /// Drops the server-assigned `id`, `meta.versionId` and `meta.lastUpdated`.
    pub fn strip_server_metadata(&mut self) {
        self.body.remove("id");
        if let Some(Value::Object(meta)) = self.body.get_mut("meta") {
            meta.remove("versionId");
            meta.remove("lastUpdated");
        }
    }
}

fn literal_of(value: &Value) -> Option<ResourceRef> {
    value
        .get("reference")
        .and_then(Value::as_str)
        .and_then(ResourceRef::parse)
}

fn collect_slots<'a>(object: &'a Map<String, Value>, path: &[&str], out: &mut Vec<&'a Value>) {
    match path {
        [] => {}
        [field] => out.extend(object.get(*field)),
        [head, rest @ ..] => match object.get(*head) {
            Some(Value::Object(child)) => collect_slots(child, rest, out),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(child) = item {
                        collect_slots(child, rest, out);
                    }
                }
            }
            _ => {}
        },
    }
}

fn rewrite_slots<F>(object: &mut Map<String, Value>, path: &[&str], resolve: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match path {
        [] => {}
        [field] => {
            let Some(value) = object.remove(*field) else {
                return;
            };
            let rewritten = match value {
                Value::Array(items) => {
                    let kept: Vec<Value> = items
                        .into_iter()
                        .filter_map(|item| rewrite_reference(item, resolve))
                        .collect();
                    (!kept.is_empty()).then_some(Value::Array(kept))
                }
                other => rewrite_reference(other, resolve),
            };
            if let Some(value) = rewritten {
                object.insert(field.to_string(), value);
            }
        }
        [head, rest @ ..] => match object.get_mut(*head) {
            Some(Value::Object(child)) => rewrite_slots(child, rest, resolve),
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(child) = item {
                        rewrite_slots(child, rest, resolve);
                    }
                }
            }
            _ => {}
        },
    }
}

fn rewrite_reference<F>(value: Value, resolve: &F) -> Option<Value>
where
    F: Fn(&str) -> Option<String>,
{
    let Value::Object(mut reference) = value else {
        return None;
    };

    if let Some(raw) = reference.get("reference").and_then(Value::as_str) {
        match resolve(raw) {
            Some(target) => {
                reference.insert("reference".to_string(), Value::String(target));
            }
            None => {
                reference.remove("reference");
            }
        }
    }

    let keep = ["reference", "identifier", "display"]
        .iter()
        .any(|key| reference.contains_key(*key));
    keep.then_some(Value::Object(reference))
}
