use phivault_model::{
    default_registry, EncryptedFieldRegistry, EncryptedModel, FieldSpec, Normalization, Patient,
    RegistryError,
};
use pretty_assertions::assert_eq;

fn patient_specs() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("first_name").searchable("first_name_index", Normalization::CaseFoldTrim),
        FieldSpec::optional("health_number").searchable("health_number_index", Normalization::Exact),
        FieldSpec::optional("notes"),
    ]
}

#[test]
fn fields_are_returned_in_declaration_order() {
    let registry = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .build();

    let names: Vec<&str> = registry
        .fields_for("patient")
        .unwrap()
        .iter()
        .map(|f| f.field_name.as_str())
        .collect();
    assert_eq!(names, vec!["first_name", "health_number", "notes"]);
}

#[test]
fn index_lookup_finds_owning_field() {
    let registry = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .build();

    let spec = registry.index("patient", "health_number_index").unwrap();
    assert_eq!(spec.field_name, "health_number");
    assert!(spec.is_searchable());
    assert!(registry.index("patient", "notes_index").is_none());
    assert!(registry.index("practitioner", "health_number_index").is_none());
    assert!(!registry.field("patient", "notes").unwrap().is_searchable());
}

#[test]
fn duplicate_index_names_are_rejected() {
    let err = EncryptedFieldRegistry::builder()
        .register(
            "patient",
            vec![
                FieldSpec::optional("email").searchable("contact_index", Normalization::CaseFoldTrim),
                FieldSpec::optional("phone").searchable("contact_index", Normalization::Exact),
            ],
        )
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::DuplicateIndex {
            entity_type: "patient".into(),
            index: "contact_index".into()
        }
    );
}

#[test]
fn same_index_name_in_different_entity_types_is_fine() {
    let registry = EncryptedFieldRegistry::builder()
        .register("patient", vec![FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim)])
        .unwrap()
        .register("practitioner", vec![FieldSpec::optional("email").searchable("email_index", Normalization::CaseFoldTrim)])
        .unwrap()
        .build();
    assert!(registry.index("patient", "email_index").is_some());
    assert!(registry.index("practitioner", "email_index").is_some());
}

#[test]
fn duplicate_and_empty_fields_are_rejected() {
    let dup = EncryptedFieldRegistry::builder()
        .register("patient", vec![FieldSpec::optional("a"), FieldSpec::required("a")])
        .unwrap_err();
    assert!(matches!(dup, RegistryError::DuplicateField { .. }));

    let empty = EncryptedFieldRegistry::builder()
        .register("patient", vec![FieldSpec::optional("")])
        .unwrap_err();
    assert!(matches!(empty, RegistryError::EmptyFieldName { .. }));

    let empty_index = EncryptedFieldRegistry::builder()
        .register("patient", vec![FieldSpec::optional("a").searchable("", Normalization::Exact)])
        .unwrap_err();
    assert!(matches!(empty_index, RegistryError::EmptyIndexName { .. }));

    assert_eq!(
        EncryptedFieldRegistry::builder().register("", vec![]).unwrap_err(),
        RegistryError::EmptyEntityType
    );
}

#[test]
fn reregistration_appends_fields() {
    let mut extended = patient_specs();
    extended.push(FieldSpec::optional("allergies"));

    let registry = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .register("patient", extended)
        .unwrap()
        .build();
    let fields = registry.fields_for("patient").unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[3].field_name, "allergies");
}

#[test]
fn required_cannot_be_relaxed() {
    let mut relaxed = patient_specs();
    relaxed[0].required = false;

    let err = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .register("patient", relaxed)
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::RequiredChanged {
            entity_type: "patient".into(),
            field: "first_name".into(),
            was: true,
            now: false
        }
    );
}

#[test]
fn fields_cannot_be_dropped_or_reindexed() {
    let dropped = patient_specs().into_iter().skip(1).collect();
    let err = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .register("patient", dropped)
        .unwrap_err();
    assert!(matches!(err, RegistryError::FieldRemoved { field, .. } if field == "first_name"));

    let mut reindexed = patient_specs();
    reindexed[1] = FieldSpec::optional("health_number").searchable("hn_index", Normalization::Exact);
    let err = EncryptedFieldRegistry::builder()
        .register("patient", patient_specs())
        .unwrap()
        .register("patient", reindexed)
        .unwrap_err();
    assert!(matches!(err, RegistryError::IndexChanged { .. }));
}

#[test]
fn default_registry_declares_people() {
    let registry = default_registry().unwrap();
    let types: Vec<&str> = registry.entity_types().collect();
    assert_eq!(
        types,
        vec!["central_patient", "central_practitioner", "patient", "practitioner"]
    );
    let hn = registry.index(Patient::ENTITY_TYPE, "health_number_index").unwrap();
    assert_eq!(hn.index.as_ref().unwrap().normalization, Normalization::Exact);
}
