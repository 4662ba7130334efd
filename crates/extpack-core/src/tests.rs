use std::collections::BTreeSet;

use semver::{Version, VersionReq};

use super::*;

fn all_archive_types() -> [ArchiveType; 6] {
    [
        ArchiveType::Jar,
        ArchiveType::Zip,
        ArchiveType::Xar,
        ArchiveType::TarGz,
        ArchiveType::TarZst,
        ArchiveType::Bin,
    ]
}

#[test]
fn parse_descriptor() {
    let content = r#"
id = "wiki-macros"
version = "1.4.0"
type = "file"

[dependencies]
rendering = ">=2.0.0, <3.0.0"

[optional-dependencies]
charts = "^1.0"

[properties]
name = "Wiki Macros"

[artifact]
url = "https://example.test/wiki-macros-1.4.0.jar"
sha256 = "abc123"
size = 42
"#;

    let parsed = ExtensionManifest::from_toml_str(content).expect("descriptor should parse");
    assert_eq!(parsed.id, "wiki-macros");
    assert_eq!(parsed.version.to_string(), "1.4.0");
    assert_eq!(parsed.extension_type, "file");
    assert_eq!(
        parsed.dependencies.get("rendering"),
        Some(&VersionReq::parse(">=2.0.0, <3.0.0").expect("valid version req"))
    );
    assert!(parsed.optional_dependencies.contains_key("charts"));
    assert_eq!(
        parsed.properties.get("name").map(String::as_str),
        Some("Wiki Macros")
    );

    let extension = parsed.into_extension(RepositoryId::remote("main"));
    assert_eq!(extension.id.to_string(), "wiki-macros@1.4.0");
    assert_eq!(extension.dependencies.len(), 2);
    assert!(!extension.dependencies[0].optional);
    assert_eq!(extension.dependencies[0].id, "rendering");
    assert!(extension.dependencies[1].optional);
    assert_eq!(extension.repository.to_string(), "remote:main");
    assert_eq!(
        extension
            .artifact
            .as_ref()
            .expect("artifact must be present")
            .archive_type()
            .expect("archive type must infer"),
        ArchiveType::Jar
    );
}

#[test]
fn descriptor_type_defaults_to_file() {
    let parsed = ExtensionManifest::from_toml_str("id = \"plain\"\nversion = \"0.1.0\"\n")
        .expect("descriptor should parse");
    assert_eq!(parsed.extension_type, "file");
    assert!(parsed.artifact.is_none());
}

#[test]
fn descriptor_rejects_self_dependency() {
    let content = r#"
id = "loop"
version = "1.0.0"

[dependencies]
loop = "*"
"#;
    let err = ExtensionManifest::from_toml_str(content).expect_err("must reject self dependency");
    assert!(err.to_string().contains("depends on itself"));
}

#[test]
fn descriptor_rejects_dependency_listed_twice() {
    let content = r#"
id = "twice"
version = "1.0.0"

[dependencies]
shared = "^1"

[optional-dependencies]
shared = "^1"
"#;
    let err = ExtensionManifest::from_toml_str(content).expect_err("must reject duplicate");
    assert!(err.to_string().contains("both a dependency"));
}

#[test]
fn descriptor_rejects_invalid_id() {
    let err = ExtensionManifest::from_toml_str("id = \"-bad\"\nversion = \"1.0.0\"\n")
        .expect_err("must reject invalid id");
    assert!(err.to_string().contains("invalid extension id"));
}

#[test]
fn extension_id_parse_and_display() {
    let id = ExtensionId::parse("wiki-macros@1.2.3").expect("id must parse");
    assert_eq!(id.id, "wiki-macros");
    assert_eq!(id.version, Version::new(1, 2, 3));
    assert_eq!(id.to_string(), "wiki-macros@1.2.3");

    let same: ExtensionId = "wiki-macros@1.2.3".parse().expect("id must parse");
    assert_eq!(id, same);
    assert_ne!(
        id,
        ExtensionId::parse("wiki-macros@1.2.4").expect("id must parse")
    );
}

#[test]
fn extension_id_parse_rejects_missing_version() {
    let err = ExtensionId::parse("wiki-macros").expect_err("must require version");
    assert!(err.to_string().contains("<id>@<version>"));
    ExtensionId::parse("wiki@not-a-version").expect_err("must reject invalid version");
}

#[test]
fn validate_extension_id_rules() {
    validate_extension_id("org.example:macros_1").expect("must accept id");
    validate_extension_id("").expect_err("must reject empty id");
    validate_extension_id(".hidden").expect_err("must reject leading punctuation");
    validate_extension_id("has space").expect_err("must reject space");
    validate_extension_id(&"a".repeat(129)).expect_err("must reject long id");
}

#[test]
fn validate_namespace_rules() {
    validate_namespace("wiki:main").expect("must accept namespace");
    validate_namespace("").expect_err("must reject empty namespace");
    validate_namespace("a/b").expect_err("must reject slash");
    assert_eq!(namespace_label(None), "<root>");
    assert_eq!(namespace_label(Some("wiki")), "wiki");
}

#[test]
fn repository_id_round_trips_text_form() {
    let id = RepositoryId::parse("remote:main").expect("repository id must parse");
    assert_eq!(id, RepositoryId::remote("main"));
    assert_eq!(RepositoryId::core().to_string(), "core:core");
    RepositoryId::parse("mirror:main").expect_err("must reject unknown kind");
    RepositoryId::parse("remote:").expect_err("must reject empty name");
}

#[test]
fn dependency_parse_and_match() {
    let dependency = ExtensionDependency::parse("rendering@^2.1", false).expect("must parse");
    assert_eq!(dependency.id, "rendering");
    assert!(dependency.matches(&ExtensionId::new("rendering", Version::new(2, 3, 0))));
    assert!(!dependency.matches(&ExtensionId::new("rendering", Version::new(3, 0, 0))));
    assert!(!dependency.matches(&ExtensionId::new("other", Version::new(2, 3, 0))));

    let any = ExtensionDependency::parse("charts", true).expect("must parse");
    assert!(any.optional);
    assert!(any.matches(&ExtensionId::new("charts", Version::new(0, 0, 1))));
}

#[test]
fn local_extension_namespace_membership() {
    let extension = Extension::new(
        ExtensionId::new("macros", Version::new(1, 0, 0)),
        "file",
        RepositoryId::local(),
    );
    let mut local = LocalExtension {
        extension,
        namespaces: BTreeSet::from([Some("wiki-a".to_string())]),
        installed_as_dependency_of: BTreeSet::new(),
        installed_at_unix: 0,
    };

    assert!(local.is_installed_in(Some("wiki-a")));
    assert!(local.satisfies_namespace(Some("wiki-a")));
    assert!(!local.satisfies_namespace(Some("wiki-b")));
    assert!(!local.satisfies_namespace(None));

    local.namespaces.insert(None);
    assert!(local.satisfies_namespace(Some("wiki-b")));
    assert!(!local.is_installed_in(Some("wiki-b")));
    assert_eq!(local.named_namespaces().collect::<Vec<_>>(), vec!["wiki-a"]);
}

#[test]
fn core_extension_forces_core_repository() {
    let core = CoreExtension::new(Extension::new(
        ExtensionId::new("platform", Version::new(9, 0, 0)),
        "file",
        RepositoryId::remote("main"),
    ));
    assert_eq!(core.extension().repository, RepositoryId::core());
    assert!(ResolvedExtension::Core(core).is_core());
}

#[test]
fn archive_type_parse_and_infer() {
    for archive_type in all_archive_types() {
        assert_eq!(ArchiveType::parse(archive_type.as_str()), Some(archive_type));
    }
    assert_eq!(ArchiveType::parse("tgz"), Some(ArchiveType::TarGz));
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/a.tar.zst?sig=1#frag"),
        Some(ArchiveType::TarZst)
    );
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/download/tool"),
        Some(ArchiveType::Bin)
    );
    assert_eq!(ArchiveType::infer_from_url("https://example.test/a.rar"), None);
    assert!(!ArchiveType::Bin.is_archive());
    assert!(ArchiveType::Jar.is_archive());
}

#[test]
fn artifact_explicit_archive_overrides_url() {
    let artifact = ExtensionArtifact {
        url: "https://example.test/download".to_string(),
        sha256: "abc".to_string(),
        size: None,
        archive: Some("zip".to_string()),
    };
    assert_eq!(artifact.archive_type().expect("must parse"), ArchiveType::Zip);

    let unsupported = ExtensionArtifact {
        archive: Some("rar".to_string()),
        ..artifact
    };
    let err = unsupported.archive_type().expect_err("must reject rar");
    assert!(err.to_string().contains("unsupported archive type"));
}

#[test]
fn error_messages_name_the_namespace() {
    let err = ExtensionError::install("macros", None, "already installed");
    assert_eq!(
        err.to_string(),
        "failed to install extension 'macros' in namespace <root>: already installed"
    );
    assert_eq!(err.kind(), "install");

    let err = ExtensionError::DependencyCycle {
        chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
    };
    assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");

    let context = anyhow::anyhow!("root cause").context("failed reading index");
    let err = ExtensionError::collect_from("main", &context);
    assert!(err.to_string().contains("failed reading index: root cause"));
}
