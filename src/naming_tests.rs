// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `naming.rs`

#[cfg(test)]
mod tests {
    use crate::naming::*;

    #[test]
    fn test_namespace_for() {
        assert_eq!(namespace_for("cp1"), "cp1-system");
    }

    #[test]
    fn test_db_name_replaces_non_alphanumeric() {
        assert_eq!(db_name("my-cp.v2"), "my_cp_v2");
        assert_eq!(db_name("cp1"), "cp1");
    }

    #[test]
    fn test_db_name_distinct_per_control_plane() {
        assert_ne!(db_name("team-a"), db_name("team-b"));
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(external_host("cp1", "localtest.me"), "cp1.localtest.me");
        assert_eq!(
            external_url("cp1", "localtest.me", 9443),
            "https://cp1.localtest.me:9443"
        );
        assert_eq!(
            in_cluster_apiserver_url("cp1-system"),
            "https://kube-apiserver.cp1-system.svc:9444"
        );
    }

    #[test]
    fn test_apiserver_extra_dns_names() {
        let names = apiserver_extra_dns_names("cp1", "example.com");
        assert!(names.contains(&"cp1.example.com".to_string()));
        assert!(names.contains(&"kube-apiserver.cp1-system.svc".to_string()));
        assert!(names.contains(&"kube-apiserver.cp1-system.svc.cluster.local".to_string()));
    }
}
