use modgraph_core::repository::RepositoryDocument;
use modgraph_core::requirements::Requirements;

#[test]
fn parse_full_requirements() {
    let reqs = Requirements::parse_toml(
        r#"
files = ["libs/local.jar"]

[root]
module = "com.example:app"
version = "1.0"

[root.attributes]
usage = "runtime"

[[requirement]]
module = "org.a:lib"
version = "[1.0,2.0)"
reject = ["1.3"]

[[requirement.exclude]]
group = "org.b"
within = ["org.b:b"]

[[requirement]]
module = "org.c:c"
version = "2.0"
force = true
transitive = false

[[substitution]]
module = "org.legacy:*"
use-module = "org.modern:lib"
use-version = "3.0"
"#,
    )
    .unwrap();

    assert_eq!(reqs.root_component().unwrap().to_string(), "com.example:app:1.0");
    assert_eq!(reqs.root.attributes.get("usage").map(String::as_str), Some("runtime"));
    assert_eq!(reqs.requirements.len(), 2);
    let first = &reqs.requirements[0];
    assert!(first.transitive, "transitive defaults to true");
    assert_eq!(first.reject, ["1.3"]);
    assert_eq!(first.excludes[0].group.as_deref(), Some("org.b"));
    assert_eq!(first.excludes[0].within, ["org.b:b"]);
    let second = &reqs.requirements[1];
    assert!(second.force);
    assert!(!second.transitive);
    assert_eq!(reqs.files.len(), 1);
    assert_eq!(reqs.substitutions[0].use_module.as_deref(), Some("org.modern:lib"));
}

#[test]
fn requirement_with_bad_module_is_rejected() {
    let err = Requirements::parse_toml(
        r#"
[root]
module = "com.example:app"

[[requirement]]
module = "not-a-module"
version = "1.0"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("not-a-module"), "got: {err}");
}

#[test]
fn root_version_defaults_to_unspecified() {
    let reqs = Requirements::parse_toml("[root]\nmodule = \"a:b\"\n").unwrap();
    assert_eq!(reqs.root.version, "unspecified");
}

#[test]
fn parse_repository_document() {
    let doc = RepositoryDocument::parse_toml(
        r#"
[[component]]
module = "org.a:lib"
version = "1.9"
artifacts = ["lib"]

[[component.dependency]]
module = "org.b:b"
version = "3.0"

[[component]]
module = "org.b:b"
version = "3.0"
status = "milestone"

[[component.variant]]
name = "runtime"
attributes = { usage = "runtime" }
artifacts = ["b", "b:native@so"]
"#,
    )
    .unwrap();
    assert_eq!(doc.components.len(), 2);
    assert_eq!(doc.components[0].status, "release");
    assert_eq!(doc.components[0].dependencies[0].module, "org.b:b");
    assert_eq!(doc.components[1].status, "milestone");
    assert_eq!(doc.components[1].variants[0].artifacts.len(), 2);
}
