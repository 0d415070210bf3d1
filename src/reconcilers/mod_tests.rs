// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for reconciler helper functions.

#[cfg(test)]
mod tests {
    use crate::reconcilers::Requeue;
    use std::time::Duration;

    #[test]
    fn test_requeue_merge_keeps_earliest() {
        let merged = Requeue::after_secs(5).merge(Requeue::after_secs(1));
        assert_eq!(merged.duration(), Some(Duration::from_secs(1)));

        let merged = Requeue::after_secs(1).merge(Requeue::after_secs(5));
        assert_eq!(merged.duration(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_requeue_merge_with_none() {
        assert_eq!(
            Requeue::none().merge(Requeue::after_secs(5)),
            Requeue::after_secs(5)
        );
        assert_eq!(
            Requeue::after_secs(5).merge(Requeue::none()),
            Requeue::after_secs(5)
        );
        assert!(Requeue::none().merge(Requeue::none()).duration().is_none());
    }
}
