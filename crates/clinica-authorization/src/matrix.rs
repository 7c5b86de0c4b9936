//! Built-in permission matrix for the clinic directory
//!
//! Role mapping: platform staff is [`Role::Administrator`], clinic staff is
//! [`Role::ScopedStaff`] scoped to its clinic, patients are [`Role::Member`].
//! Resources owned by a clinic carry that clinic as their owner scope; a
//! clinic record is owned by its own id.

use crate::actor::Role;
use crate::errors::PolicyResult;
use crate::policy::{PolicyRule, PolicyTable};
use crate::resource::ActionKind;

const PUBLIC: [Role; 3] = [Role::Anonymous, Role::Member, Role::ScopedStaff];
const ADMIN: [Role; 1] = [Role::Administrator];
const CRUD: [ActionKind; 4] = [
    ActionKind::Create,
    ActionKind::Read,
    ActionKind::Update,
    ActionKind::Delete,
];

/// Lifecycle state of approved clinics and reviews
pub const APPROVED: &str = "approved";
/// Lifecycle state of published content
pub const PUBLISHED: &str = "published";

/// Reference data: administrators write, everyone reads
const MASTER_DATA: &[&str] = &[
    "treatments",
    "medical-specialties",
    "countries",
    "cities",
    "tags",
    "categories",
    "accreditation",
    "platformContentMedia",
];

/// Doctor-level records clinic staff manage for their own clinic
const CLINIC_SCOPED_RECORDS: &[&str] = &[
    "doctors",
    "clinictreatments",
    "doctortreatments",
    "doctorspecialties",
];

/// Rule table of the clinic directory
pub fn clinic_directory_policy() -> PolicyResult<PolicyTable> {
    PolicyTable::new(clinic_directory_rules())
}

/// Rules behind [`clinic_directory_policy`]
pub fn clinic_directory_rules() -> Vec<PolicyRule> {
    let mut rules = Vec::new();

    // Clinics: public directory of approved clinics, staff sees and edits its own
    rules.push(
        PolicyRule::new("clinics", ActionKind::Read)
            .allow(PUBLIC)
            .visible_to(Role::Anonymous, [APPROVED])
            .visible_to(Role::Member, [APPROVED])
            .visible_to(Role::ScopedStaff, [APPROVED]),
    );
    rules.push(
        PolicyRule::new("clinics", ActionKind::Read)
            .allow([Role::ScopedStaff])
            .scoped(),
    );
    rules.push(
        PolicyRule::new("clinics", ActionKind::Update)
            .allow([Role::ScopedStaff])
            .scoped()
            .restrict(["status", "averageRating"]),
    );
    rules.push(
        PolicyRule::new("clinics", ActionKind::WriteField)
            .allow([Role::ScopedStaff])
            .scoped(),
    );
    rules.push(admin_only("clinics", ActionKind::Create));
    rules.push(admin_only("clinics", ActionKind::Delete));

    for resource in CLINIC_SCOPED_RECORDS {
        rules.push(PolicyRule::new(*resource, ActionKind::Read).allow(PUBLIC));
        for action in [ActionKind::Create, ActionKind::Update] {
            rules.push(
                PolicyRule::new(*resource, action)
                    .allow([Role::ScopedStaff])
                    .scoped(),
            );
        }
        rules.push(admin_only(*resource, ActionKind::Delete));
    }
    rules.push(
        PolicyRule::new("doctors", ActionKind::Update)
            .allow([Role::ScopedStaff])
            .scoped()
            .restrict(["averageRating"]),
    );

    // Patients manage their own favorites and profile only
    for action in CRUD {
        rules.push(
            PolicyRule::new("favoriteclinics", action)
                .allow([Role::Member])
                .owner_only(),
        );
    }
    for action in [ActionKind::Read, ActionKind::Update] {
        rules.push(
            PolicyRule::new("patients", action)
                .allow([Role::Member])
                .owner_only(),
        );
    }
    rules.push(admin_only("patients", ActionKind::Create));
    rules.push(admin_only("patients", ActionKind::Delete));

    // Reviews: patients submit, moderation decides what becomes public
    rules.push(
        PolicyRule::new("reviews", ActionKind::Create)
            .allow([Role::Member])
            .restrict(["status"]),
    );
    rules.push(published_read("reviews", APPROVED));
    rules.push(admin_only("reviews", ActionKind::Update));
    rules.push(admin_only("reviews", ActionKind::Delete));

    for resource in ["posts", "pages"] {
        rules.push(published_read(resource, PUBLISHED));
        for action in [ActionKind::Create, ActionKind::Update, ActionKind::Delete] {
            rules.push(admin_only(resource, action));
        }
    }

    for resource in MASTER_DATA {
        rules.push(PolicyRule::new(*resource, ActionKind::Read).allow(PUBLIC));
        for action in [ActionKind::Create, ActionKind::Update, ActionKind::Delete] {
            rules.push(admin_only(*resource, action));
        }
    }

    // Anyone may apply to be listed; only administrators triage
    rules.push(
        PolicyRule::new("clinicApplications", ActionKind::Create)
            .allow([Role::Anonymous, Role::Member]),
    );
    for action in [ActionKind::Read, ActionKind::Update, ActionKind::Delete] {
        rules.push(admin_only("clinicApplications", action));
    }

    // Clinic-owned media: ownership is frozen once set
    for resource in ["clinicMedia", "doctorMedia", "clinicGalleryMedia"] {
        for action in CRUD {
            rules.push(
                PolicyRule::new(resource, action)
                    .allow([Role::ScopedStaff])
                    .scoped()
                    .immutable(["clinic"]),
            );
        }
    }
    rules.push(
        PolicyRule::new("clinicGalleryEntries", ActionKind::Read)
            .allow(PUBLIC)
            .visible_to(Role::Anonymous, [PUBLISHED])
            .visible_to(Role::Member, [PUBLISHED])
            .visible_to(Role::ScopedStaff, [PUBLISHED]),
    );
    for action in CRUD {
        rules.push(
            PolicyRule::new("clinicGalleryEntries", action)
                .allow([Role::ScopedStaff])
                .scoped()
                .immutable(["clinic"]),
        );
    }

    // Avatars belong to the account that uploaded them
    for action in CRUD {
        rules.push(
            PolicyRule::new("userProfileMedia", action)
                .allow([Role::Member, Role::ScopedStaff])
                .owner_only()
                .immutable(["user"]),
        );
    }

    rules
}

fn admin_only(resource: &str, action: ActionKind) -> PolicyRule {
    PolicyRule::new(resource, action).allow(ADMIN)
}

fn published_read(resource: &str, state: &str) -> PolicyRule {
    PolicyRule::new(resource, ActionKind::Read)
        .allow(PUBLIC)
        .visible_to(Role::Anonymous, [state])
        .visible_to(Role::Member, [state])
        .visible_to(Role::ScopedStaff, [state])
}
