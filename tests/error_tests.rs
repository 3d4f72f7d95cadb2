//! Tests for the error system.

use tendril::error::*;

#[test]
fn not_found_names_the_kind() {
    let err = TendrilError::chat_not_found("c1");
    assert!(matches!(&err, TendrilError::NotFound { kind: "chat", .. }));
    assert_eq!(err.to_string(), "Not found: chat c1");
    assert_eq!(
        TendrilError::message_not_found("m1").to_string(),
        "Not found: message m1"
    );
}

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: TendrilError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
    }

    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();
    let toml_error = toml::from_str::<toml::Value>("= nope").unwrap_err();

    let cases = vec![
        Case {
            error: TendrilError::message_not_found("m"),
            expected_category: ErrorCategory::NotFound,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::DuplicateRun("m".into()),
            expected_category: ErrorCategory::Conflict,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::AlreadyExists {
                kind: "chat",
                id: "c".into(),
            },
            expected_category: ErrorCategory::Conflict,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::CorruptTree {
                message_id: "m".into(),
                limit: 3,
            },
            expected_category: ErrorCategory::Corruption,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::Upstream("reset".into()),
            expected_category: ErrorCategory::Upstream,
            expected_retryable: true,
        },
        Case {
            error: TendrilError::Timeout(500),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
        },
        Case {
            error: TendrilError::Storage("disk full".into()),
            expected_category: ErrorCategory::Storage,
            expected_retryable: true,
        },
        Case {
            error: TendrilError::Io(io_error),
            expected_category: ErrorCategory::Storage,
            expected_retryable: true,
        },
        Case {
            error: TendrilError::Serialization(serde_error),
            expected_category: ErrorCategory::Serialization,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::ConfigParse(toml_error),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
        },
        Case {
            error: TendrilError::InvalidState("complete".into()),
            expected_category: ErrorCategory::Invalid,
            expected_retryable: false,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.expected_category, "{}", case.error);
        assert_eq!(case.error.is_retryable(), case.expected_retryable, "{}", case.error);
    }
}

#[test]
fn corrupt_tree_reports_the_walk_bound() {
    let err = TendrilError::CorruptTree {
        message_id: "b".into(),
        limit: 3,
    };
    assert_eq!(
        err.to_string(),
        "Corrupt message tree: walk from b exceeded 3 steps"
    );
}

#[test]
fn display_strings_use_sentence_case() {
    assert_eq!(
        TendrilError::DuplicateRun("m1".into()).to_string(),
        "Run already active for message m1"
    );
    assert_eq!(
        TendrilError::AlreadyExists {
            kind: "message",
            id: "u1".into(),
        }
        .to_string(),
        "Already exists: message u1"
    );
    assert_eq!(
        TendrilError::Timeout(50).to_string(),
        "Stream idle timeout after 50ms"
    );
}

#[test]
fn std_errors_convert_with_question_mark() {
    fn parse() -> Result<serde_json::Value> {
        Ok(serde_json::from_str("[")?)
    }
    assert!(matches!(parse(), Err(TendrilError::Serialization(_))));
}
