use crate::error::{SchoolError, SchoolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Registrar,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Registrar => "registrar",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Reference,
    Track,
    Policy,
    CurrentPolicy,
    Class,
    Subject,
    Student,
    StudentLookup,
    Grade,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

const POLICY_FIELDS: &[&str] = &[
    "maxClassesGrade10",
    "maxClassesGrade11",
    "maxClassesGrade12",
    "maxClassSize",
    "maxSubjectsPerClass",
    "minAge",
    "maxAge",
    "passingThreshold",
    "lockSemester1",
    "lockSemester2",
];
pub const POLICY_LOCK_FIELDS: &[&str] = &["lockSemester1", "lockSemester2"];
const CLASS_FIELDS: &[&str] = &["name", "tierId", "trackId"];
const SUBJECT_FIELDS: &[&str] = &["name", "trackId"];
const STUDENT_FIELDS: &[&str] = &[
    "lastName",
    "firstName",
    "gender",
    "birthDate",
    "address",
    "email",
    "intakeYearId",
    "expectedTierId",
];

pub fn allows(role: Role, resource: Resource, action: Action) -> bool {
    use Action::*;
    use Resource::*;
    use Role::*;
    match (resource, action) {
        (
            Reference | CurrentPolicy | Class | Subject | StudentLookup | Grade | Report | Track,
            Read,
        ) => true,
        (Track, _) => role == Administrator,
        (Policy, Read) => matches!(role, Administrator | Registrar),
        (Policy, Update) => matches!(role, Administrator | Registrar),
        (Policy, Create | Delete) => role == Administrator,
        (Class | Subject | Student, _) => matches!(role, Administrator | Registrar),
        (Grade, Create | Update) => true,
        _ => false,
    }
}

/// The fields `role` may write on `resource`. Applied to every patch before
/// anything reaches a service. Grade writes carry a fixed shape and no patch.
pub fn editable_fields(role: Role, resource: Resource) -> &'static [&'static str] {
    match (resource, role) {
        (Resource::Policy, Role::Administrator) => POLICY_FIELDS,
        (Resource::Policy, Role::Registrar) => POLICY_LOCK_FIELDS,
        (Resource::Class, Role::Administrator | Role::Registrar) => CLASS_FIELDS,
        (Resource::Subject, Role::Administrator | Role::Registrar) => SUBJECT_FIELDS,
        (Resource::Student, Role::Administrator | Role::Registrar) => STUDENT_FIELDS,
        _ => &[],
    }
}

pub fn ensure_allowed(role: Role, resource: Resource, action: Action) -> SchoolResult<()> {
    if allows(role, resource, action) {
        return Ok(());
    }
    Err(SchoolError::permission(format!(
        "role {} may not {} {}",
        role.as_str(),
        action_verb(action),
        resource_noun(resource)
    )))
}

/// Rejects any key of `patch` outside the role's editable set.
pub fn ensure_patch_fields(
    role: Role,
    resource: Resource,
    patch: &Map<String, Value>,
) -> SchoolResult<()> {
    let allowed = editable_fields(role, resource);
    let mut rejected: Vec<&str> = patch
        .keys()
        .map(|k| k.as_str())
        .filter(|k| !allowed.contains(k))
        .collect();
    if rejected.is_empty() {
        return Ok(());
    }
    rejected.sort_unstable();
    Err(SchoolError::permission(format!(
        "role {} may not edit {} field(s): {}",
        role.as_str(),
        resource_noun(resource),
        rejected.join(", ")
    )))
}

fn action_verb(action: Action) -> &'static str {
    match action {
        Action::Read => "read",
        Action::Create => "create",
        Action::Update => "update",
        Action::Delete => "delete",
    }
}

fn resource_noun(resource: Resource) -> &'static str {
    match resource {
        Resource::Reference => "reference data",
        Resource::Track => "tracks",
        Resource::Policy | Resource::CurrentPolicy => "policies",
        Resource::Class => "classes",
        Resource::Subject => "subjects",
        Resource::Student => "students",
        Resource::StudentLookup => "student lookups",
        Resource::Grade => "grades",
        Resource::Report => "reports",
    }
}
