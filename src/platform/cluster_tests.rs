// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cluster.rs`

#[cfg(test)]
mod tests {
    use crate::errors::PlatformError;
    use crate::platform::cluster::{label_selector, map_kube_error, Verb};
    use kube::core::Status;
    use std::collections::BTreeMap;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            Status::failure(&format!("{reason} happened"), reason)
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_404_maps_to_not_found_for_every_verb() {
        for verb in [Verb::Read, Verb::Create, Verb::Update, Verb::Delete] {
            let err = map_kube_error(api_error(404, "NotFound"), "Deployment", "bar/foo", verb);
            assert!(err.is_not_found(), "verb {verb:?} should map 404 to NotFound");
        }
    }

    #[test]
    fn test_409_depends_on_verb() {
        let on_create = map_kube_error(api_error(409, "AlreadyExists"), "Service", "bar/foo", Verb::Create);
        assert!(matches!(on_create, PlatformError::AlreadyExists { .. }));

        let on_update = map_kube_error(api_error(409, "Conflict"), "Service", "bar/foo", Verb::Update);
        assert!(matches!(on_update, PlatformError::Conflict { .. }));
        assert!(on_update.is_conflict());
    }

    #[test]
    fn test_other_codes_keep_message() {
        let err = map_kube_error(api_error(422, "Invalid"), "Service", "bar/foo", Verb::Update);
        assert_eq!(
            err,
            PlatformError::Api {
                kind: "Service".to_string(),
                name: "bar/foo".to_string(),
                code: 422,
                message: "Invalid happened".to_string(),
            }
        );
    }

    #[test]
    fn test_label_selector() {
        let mut labels = BTreeMap::new();
        assert_eq!(label_selector(&labels), "");

        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        assert_eq!(label_selector(&labels), "a=1,b=2");
    }
}
