//! Policy rules and the immutable rule table
//!
//! Rules are configuration, loaded once at startup. The table indexes them by
//! resource type and precomputes the per-type field restrictions so the
//! evaluator never has to scan the whole rule set.

use crate::actor::Role;
use crate::errors::PolicyError;
use crate::resource::ActionKind;
use clinica_core::{ConfigValidation, ConfigValidator, FieldName, LifecycleState, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One grant for a `(resource type, action)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Resource type the rule applies to
    pub resource_type: ResourceType,
    /// Action the rule grants
    pub action: ActionKind,
    /// Roles the grant applies to
    pub allowed_roles: BTreeSet<Role>,
    /// Actor scope must equal the resource's owning scope
    #[serde(default)]
    pub requires_owner_scope_match: bool,
    /// Actor identity must equal the resource's owning identity
    #[serde(default)]
    pub requires_owner_identity_match: bool,
    /// Lifecycle states each role may see on reads
    ///
    /// Roles absent from the map see every state.
    #[serde(default, with = "role_keyed")]
    pub visible_lifecycle_states: BTreeMap<Role, BTreeSet<LifecycleState>>,
    /// Fields only an administrator may write
    #[serde(default)]
    pub restricted_fields: BTreeSet<FieldName>,
    /// Fields frozen once the instance exists
    #[serde(default)]
    pub immutable_fields: BTreeSet<FieldName>,
}

impl PolicyRule {
    /// Start a rule granting nothing
    pub fn new(resource_type: impl Into<ResourceType>, action: ActionKind) -> Self {
        Self {
            resource_type: resource_type.into(),
            action,
            allowed_roles: BTreeSet::new(),
            requires_owner_scope_match: false,
            requires_owner_identity_match: false,
            visible_lifecycle_states: BTreeMap::new(),
            restricted_fields: BTreeSet::new(),
            immutable_fields: BTreeSet::new(),
        }
    }

    /// Grant to `roles`
    pub fn allow(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed_roles.extend(roles);
        self
    }

    /// Require the actor's scope to own the instance
    pub fn scoped(mut self) -> Self {
        self.requires_owner_scope_match = true;
        self
    }

    /// Require the actor to personally own the instance
    pub fn owner_only(mut self) -> Self {
        self.requires_owner_identity_match = true;
        self
    }

    /// Limit what `role` sees on reads to `states`
    pub fn visible_to<I, S>(mut self, role: Role, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<LifecycleState>,
    {
        self.visible_lifecycle_states
            .entry(role)
            .or_default()
            .extend(states.into_iter().map(Into::into));
        self
    }

    /// Mark fields as administrator-only
    pub fn restrict<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldName>,
    {
        self.restricted_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Mark fields as frozen after creation
    pub fn immutable<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldName>,
    {
        self.immutable_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Whether the rule applies to `role` at all
    pub fn grants_role(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }

    fn check(&self, validator: &mut ConfigValidator) {
        validator
            .non_empty("resource_type", self.resource_type.as_str())
            .check(
                "allowed_roles",
                !self.allowed_roles.is_empty(),
                "at least one role is required",
            )
            .check(
                "requires_owner_identity_match",
                !(self.requires_owner_scope_match && self.requires_owner_identity_match),
                "a rule scopes by owner scope or owner identity, not both",
            )
            .check(
                "visible_lifecycle_states",
                self.visible_lifecycle_states.is_empty() || self.action.is_read(),
                "lifecycle visibility only applies to read rules",
            )
            .check(
                "requires_owner_scope_match",
                !(self.requires_owner_scope_match && self.grants_role(Role::Anonymous)),
                "anonymous actors never carry a scope",
            );
    }
}

/// Rules and derived field sets for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypePolicy {
    rules: BTreeMap<ActionKind, Vec<PolicyRule>>,
    restricted_fields: BTreeSet<FieldName>,
    immutable_fields: BTreeSet<FieldName>,
}

impl TypePolicy {
    /// Rules registered for `action`
    pub fn rules_for(&self, action: ActionKind) -> &[PolicyRule] {
        self.rules.get(&action).map(Vec::as_slice).unwrap_or_default()
    }

    /// Union of restricted fields across every rule of the type
    pub fn restricted_fields(&self) -> &BTreeSet<FieldName> {
        &self.restricted_fields
    }

    /// Union of immutable fields across every rule of the type
    pub fn immutable_fields(&self) -> &BTreeSet<FieldName> {
        &self.immutable_fields
    }

    fn insert(&mut self, rule: PolicyRule) {
        self.restricted_fields.extend(rule.restricted_fields.iter().cloned());
        self.immutable_fields.extend(rule.immutable_fields.iter().cloned());
        self.rules.entry(rule.action).or_default().push(rule);
    }
}

/// Serialized form of a policy table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// All rules, in any order
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl ConfigValidation for PolicyDocument {
    fn validate(&self) -> Result<(), clinica_core::ClinicaError> {
        let root = ConfigValidator::new();
        let mut validator = ConfigValidator::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let mut nested = root.for_field(&format!("rules[{index}]"));
            rule.check(&mut nested);
            validator.merge(nested);
        }
        Ok(validator.result()?)
    }
}

/// Immutable rule table indexed by resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    types: BTreeMap<ResourceType, TypePolicy>,
}

impl PolicyTable {
    /// Validate and index `rules`
    pub fn new(rules: impl IntoIterator<Item = PolicyRule>) -> Result<Self, PolicyError> {
        Self::from_document(PolicyDocument {
            rules: rules.into_iter().collect(),
        })
    }

    /// Validate and index a parsed document
    pub fn from_document(document: PolicyDocument) -> Result<Self, PolicyError> {
        document.validate().map_err(PolicyError::from)?;

        let mut types: BTreeMap<ResourceType, TypePolicy> = BTreeMap::new();
        for rule in document.rules {
            types
                .entry(rule.resource_type.clone())
                .or_default()
                .insert(rule);
        }
        tracing::debug!(resource_types = types.len(), "policy table loaded");
        Ok(Self { types })
    }

    /// Parse a TOML document with `[[rules]]` entries
    pub fn from_toml_str(content: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument = clinica_core::parse_toml(content)?;
        Self::from_document(document)
    }

    /// Load a TOML policy file
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let document: PolicyDocument = clinica_core::load_toml(path)?;
        Self::from_document(document)
    }

    /// Policy for `resource_type`, `None` when the type is unconfigured
    pub fn resource(&self, resource_type: &ResourceType) -> Option<&TypePolicy> {
        self.types.get(resource_type)
    }

    /// Configured resource types
    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.types.keys()
    }

    /// Total number of rules
    pub fn rule_count(&self) -> usize {
        self.types
            .values()
            .flat_map(|t| t.rules.values())
            .map(Vec::len)
            .sum()
    }
}

/// (De)serialize role-keyed maps through string keys
mod role_keyed {
    use crate::actor::Role;
    use clinica_core::LifecycleState;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, BTreeSet};

    type States = BTreeSet<LifecycleState>;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<Role, States>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .iter()
            .map(|(role, states)| (role.to_string(), states))
            .collect::<BTreeMap<String, &States>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Role, States>, D::Error> {
        BTreeMap::<String, States>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, states)| {
                key.parse::<Role>()
                    .map(|role| (role, states))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
