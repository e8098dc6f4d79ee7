//! End-to-end import behavior against the in-memory gateway.
//!
//! Covers idempotence, dry-run equivalence, intra-batch tie-breaks, merge
//! safety, tenant defaults, referential checks and all-or-nothing commits.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use curricula::models::{Course, Resolution, Section};
use curricula::{
    Classification, Engine, EngineConfig, Entity, EntityKind, Error, ImportFlags, MemoryGateway,
    NaturalKey, PersistenceGateway, ResolutionStrategy, SourceDocument, StaticTenantContext,
    TenantDefaults, TenantScope,
};

const CATALOG: &str = "\
kind,course_number,title,credit_hours,employee_id,full_name,term,section_code,instructor_id,outcome_code,description
course,BIO101,Intro to Biology,4,,,,,,,
course,CHEM101,General Chemistry,4,,,,,,,
instructor,,,,E100,Ada Lovelace,,,,,
section,BIO101,,,,,FA25,001,E100,,
outcome,BIO101,,,,,,,,LO1,Explain cell structure
";

fn engine() -> (Engine, Arc<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = Engine::with_default_adapters(EngineConfig::default(), gateway.clone()).unwrap();
    (engine, gateway)
}

fn tenant() -> StaticTenantContext {
    StaticTenantContext::institution("state-u")
}

fn csv(text: &str) -> SourceDocument {
    SourceDocument::from_bytes("batch.csv", text)
}

fn snapshot(gateway: &MemoryGateway) -> Vec<Entity> {
    gateway
        .records_for(&curricula::TenantScope::institution("state-u"))
        .into_iter()
        .map(|r| r.entity)
        .collect()
}

#[test]
fn test_import_is_idempotent() {
    let (engine, gateway) = engine();

    let first = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert!(first.is_completed());
    assert_eq!(first.totals().new, 5);
    assert!(!first.has_errors());
    let after_first = snapshot(&gateway);

    let second = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(second.totals().unchanged, 5);
    assert_eq!(second.totals().new, 0);
    assert_eq!(second.totals().update, 0);
    assert_eq!(snapshot(&gateway), after_first);
}

#[test]
fn test_dry_run_matches_real_run() {
    let (engine, gateway) = engine();
    gateway.seed(
        &curricula::TenantScope::institution("state-u"),
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Biology".to_string()),
            description: None,
            credit_hours: Some(3.0),
            department: None,
        }),
    );

    let dry = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::dry_run(), &tenant())
        .unwrap();
    assert_eq!(gateway.len(), 1);
    assert_eq!(gateway.transaction_count(), 0);

    let real = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(gateway.len(), 5);

    assert!(dry.same_outcome_as(&real));
    assert_eq!(dry.totals().update, 1);
    assert_eq!(dry.totals().new, 4);
    assert!(dry.dry_run);
    assert!(!real.dry_run);
    assert_ne!(dry.session_id, real.session_id);
}

#[test]
fn test_later_duplicate_wins() {
    let (engine, gateway) = engine();
    let text = "\
kind,course_number,title
course,BIO101,First Title
course,CHEM101,Chemistry
course,bio101 ,Second Title
";
    let report = engine
        .submit_import(&csv(text), "csv", ImportFlags::real(), &tenant())
        .unwrap();

    let totals = report.totals();
    assert_eq!(totals.new, 2);
    assert_eq!(totals.superseded, 1);
    assert_eq!(report.total_processed(), 3);

    let superseded = report
        .conflicts
        .iter()
        .find(|c| c.classification == Classification::Superseded)
        .unwrap();
    assert_eq!(superseded.incoming.position.ordinal, 1);
    assert_eq!(superseded.resolution, Resolution::Superseded);
    assert!(
        report
            .warnings()
            .any(|w| w.record.position.ordinal == 1 && w.message.contains("record 3"))
    );

    let stored = gateway
        .find_by_natural_key(
            &curricula::TenantScope::institution("state-u"),
            EntityKind::Course,
            &NaturalKey::parse("BIO101"),
        )
        .unwrap()
        .unwrap();
    assert!(matches!(
        stored.entity,
        Entity::Course(ref c) if c.title.as_deref() == Some("Second Title")
    ));
}

#[test]
fn test_blank_title_keeps_existing_under_merge() {
    let (engine, gateway) = engine();
    let scope = curricula::TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Intro to Biology".to_string()),
            description: None,
            credit_hours: Some(3.0),
            department: None,
        }),
    );
    let text = "\
kind,course_number,title,credit_hours
course,ART100,Drawing,3
course,BIO101,,4
course,MUS100,Music,2
";
    let report = engine
        .submit_import(&csv(text), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(report.totals().update, 1);

    let stored = gateway
        .find_by_natural_key(&scope, EntityKind::Course, &NaturalKey::parse("bio101"))
        .unwrap()
        .unwrap();
    assert!(matches!(
        stored.entity,
        Entity::Course(ref c) if c.title.as_deref() == Some("Intro to Biology")
    ));
}

#[test]
fn test_overwrite_clears_blank_field() {
    let (engine, gateway) = engine();
    let scope = curricula::TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Intro to Biology".to_string()),
            description: None,
            credit_hours: Some(3.0),
            department: None,
        }),
    );
    let flags = ImportFlags::real().with_strategy(ResolutionStrategy::OverwriteAll);
    let report = engine
        .submit_import(&csv("kind,course_number,title,credit_hours\ncourse,BIO101,,3\n"), "csv", flags, &tenant())
        .unwrap();
    assert_eq!(report.conflicts[0].resolution, Resolution::Overwrite);

    let stored = gateway
        .find_by_natural_key(&scope, EntityKind::Course, &NaturalKey::parse("bio101"))
        .unwrap()
        .unwrap();
    assert!(matches!(stored.entity, Entity::Course(ref c) if c.title.is_none()));
}

#[test]
fn test_dangling_reference_is_excluded() {
    let (engine, gateway) = engine();
    let text = "\
kind,course_number,term,section_code,instructor_id
section,NOPE101,FA25,001,
";
    let report = engine
        .submit_import(&csv(text), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(report.counts_for(EntityKind::Section).error, 1);
    assert!(report.errors().any(|e| e.field == "course_number"));
    assert!(gateway.is_empty());
}

#[test]
fn test_every_row_failing_still_completes() {
    let (engine, gateway) = engine();
    let text = "\
kind,course_number,credit_hours
room,A1,
course,,3
course,BIO101,99
";
    let report = engine
        .submit_import(&csv(text), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert!(report.is_completed());
    assert_eq!(report.rejected, 1);
    assert_eq!(report.counts_for(EntityKind::Course).error, 2);
    assert_eq!(report.total_processed(), 3);
    assert!(gateway.is_empty());
}

#[test]
fn test_write_failure_leaves_nothing_applied() {
    let (engine, gateway) = engine();
    gateway.fail_upsert_at(4);

    let err = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap_err();
    assert!(matches!(err.root_cause(), Error::Persistence { .. }));
    let report = err.partial_report().unwrap();
    assert!(!report.complete);
    assert!(report.error.as_deref().unwrap().contains("injected failure"));
    assert!(gateway.is_empty());

    gateway.clear_faults();
    let retry = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(retry.totals().new, 5);
}

#[test]
fn test_commit_failure_leaves_nothing_applied() {
    let (engine, gateway) = engine();
    gateway.fail_commit();
    let err = engine
        .submit_import(&csv(CATALOG), "csv", ImportFlags::real(), &tenant())
        .unwrap_err();
    assert!(err.partial_report().is_some());
    assert!(gateway.is_empty());
}

#[test]
fn test_structural_error_has_no_report() {
    let (engine, _) = engine();
    let err = engine
        .submit_import(
            &SourceDocument::from_bytes("bad.json", r#"{"rooms": []}"#),
            "json",
            ImportFlags::real(),
            &tenant(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Format { .. }));
    assert!(err.partial_report().is_none());
}

#[test]
fn test_skip_strategy_reports_without_writing() {
    let (engine, gateway) = engine();
    let scope = curricula::TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Biology".to_string()),
            description: None,
            credit_hours: Some(3.0),
            department: None,
        }),
    );
    let flags = ImportFlags::real().with_strategy(ResolutionStrategy::SkipAndReport);
    let report = engine
        .submit_import(&csv("kind,course_number,title\ncourse,BIO101,Zoology\n"), "csv", flags, &tenant())
        .unwrap();
    assert_eq!(report.totals().update, 1);
    assert_eq!(report.conflicts[0].resolution, Resolution::Skipped);
    assert!(report.warnings().next().is_some());

    let stored = gateway
        .find_by_natural_key(&scope, EntityKind::Course, &NaturalKey::parse("bio101"))
        .unwrap()
        .unwrap();
    assert!(matches!(stored.entity, Entity::Course(ref c) if c.title.as_deref() == Some("Biology")));
}

fn engine_with(config: EngineConfig) -> (Engine, Arc<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = Engine::with_default_adapters(config, gateway.clone()).unwrap();
    (engine, gateway)
}

fn defaults(credit_hours: Option<f64>, modality: Option<&str>) -> TenantDefaults {
    TenantDefaults {
        credit_hours,
        modality: modality.map(str::to_string),
    }
}

fn stored(gateway: &MemoryGateway, scope: &TenantScope, kind: EntityKind, key: &str) -> Entity {
    gateway
        .find_by_natural_key(scope, kind, &NaturalKey::parse(key))
        .unwrap()
        .unwrap()
        .entity
}

fn stored_credits(gateway: &MemoryGateway, scope: &TenantScope, key: &str) -> Option<f64> {
    match stored(gateway, scope, EntityKind::Course, key) {
        Entity::Course(course) => course.credit_hours,
        other => panic!("expected a course, got {other:?}"),
    }
}

#[test]
fn test_merge_keeps_stored_credits_over_default() {
    let config = EngineConfig::default().with_default_tenant(defaults(Some(3.0), None));
    let (engine, gateway) = engine_with(config);
    let scope = TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Intro to Biology".to_string()),
            description: None,
            credit_hours: Some(4.0),
            department: None,
        }),
    );

    let report = engine
        .submit_import(
            &csv("kind,course_number,title,credit_hours\ncourse,BIO101,Intro to Biology Revised,\n"),
            "csv",
            ImportFlags::real(),
            &tenant(),
        )
        .unwrap();
    assert_eq!(report.totals().update, 1);
    assert_eq!(stored_credits(&gateway, &scope, "bio101"), Some(4.0));

    let blank = engine
        .submit_import(
            &csv("kind,course_number,title,credit_hours\ncourse,BIO101,,\n"),
            "csv",
            ImportFlags::real(),
            &tenant(),
        )
        .unwrap();
    assert_eq!(blank.totals().unchanged, 1);
    assert_eq!(stored_credits(&gateway, &scope, "bio101"), Some(4.0));
}

#[test]
fn test_merge_keeps_stored_modality_over_default() {
    let config = EngineConfig::default().with_default_tenant(defaults(None, Some("in_person")));
    let (engine, gateway) = engine_with(config);
    let scope = TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Intro to Biology".to_string()),
            description: None,
            credit_hours: Some(4.0),
            department: None,
        }),
    );
    gateway.seed(
        &scope,
        Entity::Section(Section {
            course_number: "bio101".to_string(),
            term: "fa25".to_string(),
            section_code: "001".to_string(),
            instructor_id: None,
            capacity: Some(30),
            modality: Some("hybrid".to_string()),
        }),
    );

    let report = engine
        .submit_import(
            &csv("kind,course_number,term,section_code,capacity,modality\nsection,BIO101,FA25,001,40,\n"),
            "csv",
            ImportFlags::real(),
            &tenant(),
        )
        .unwrap();
    assert_eq!(report.totals().update, 1);
    assert!(matches!(
        stored(&gateway, &scope, EntityKind::Section, "bio101|fa25|001"),
        Entity::Section(ref s) if s.modality.as_deref() == Some("hybrid") && s.capacity == Some(40)
    ));
}

#[test]
fn test_new_records_take_tenant_defaults() {
    let config = EngineConfig::default()
        .with_default_tenant(defaults(Some(3.0), Some("in_person")))
        .with_tenant("north", defaults(Some(5.0), None));
    let (engine, gateway) = engine_with(config);
    let batch = "kind,course_number,credit_hours,term,section_code,modality\n\
                 course,BIO101,,,,\n\
                 course,CHEM101,2,,,\n\
                 section,BIO101,,FA25,001,\n";

    engine
        .submit_import(&csv(batch), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    let state_u = TenantScope::institution("state-u");
    assert_eq!(stored_credits(&gateway, &state_u, "bio101"), Some(3.0));
    assert_eq!(stored_credits(&gateway, &state_u, "chem101"), Some(2.0));
    assert!(matches!(
        stored(&gateway, &state_u, EntityKind::Section, "bio101|fa25|001"),
        Entity::Section(ref s) if s.modality.as_deref() == Some("in_person")
    ));

    engine
        .submit_import(
            &csv(batch),
            "csv",
            ImportFlags::real(),
            &StaticTenantContext::institution("north"),
        )
        .unwrap();
    let north = TenantScope::institution("north");
    assert_eq!(stored_credits(&gateway, &north, "bio101"), Some(5.0));
    assert!(matches!(
        stored(&gateway, &north, EntityKind::Section, "bio101|fa25|001"),
        Entity::Section(ref s) if s.modality.as_deref() == Some("in_person")
    ));

    let again = engine
        .submit_import(&csv(batch), "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(again.totals().unchanged, 3);
    assert_eq!(again.totals().update, 0);
}

#[test]
fn test_dry_run_applies_defaults_like_real_run() {
    let config = EngineConfig::default().with_default_tenant(defaults(Some(3.0), None));
    let (engine, gateway) = engine_with(config);
    let scope = TenantScope::institution("state-u");
    gateway.seed(
        &scope,
        Entity::Course(Course {
            course_number: "bio101".to_string(),
            title: Some("Intro to Biology".to_string()),
            description: None,
            credit_hours: None,
            department: None,
        }),
    );
    let batch = csv("kind,course_number,title\ncourse,BIO101,\ncourse,CHEM101,Chemistry\n");

    let preview = engine
        .submit_import(&batch, "csv", ImportFlags::dry_run(), &tenant())
        .unwrap();
    let real = engine
        .submit_import(&batch, "csv", ImportFlags::real(), &tenant())
        .unwrap();
    assert_eq!(preview.totals(), real.totals());
    assert_eq!(real.totals().update, 1);
    assert_eq!(real.totals().new, 1);
    assert_eq!(stored_credits(&gateway, &scope, "bio101"), Some(3.0));
}

#[test]
fn test_document_issues_name_section_entry() {
    let (engine, _) = engine();
    let report = engine
        .submit_import(
            &SourceDocument::from_bytes(
                "catalog.json",
                r#"{"courses": [{"course_number": "BIO101"}, {"course_number": "CHEM101", "credit_hours": "many"}]}"#,
            ),
            "json",
            ImportFlags::dry_run(),
            &tenant(),
        )
        .unwrap();
    let error = report.errors().next().unwrap();
    assert_eq!(error.record.position.ordinal, 2);
    assert!(error.to_string().contains("courses[1]"), "{error}");
}
