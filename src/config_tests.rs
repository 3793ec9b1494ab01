// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use crate::config::*;
    use clap::Parser;
    use std::collections::BTreeMap;

    #[test]
    fn test_flags_override_defaults() {
        let cfg = OperatorConfig::parse_from([
            "kflex",
            "--domain",
            "example.com",
            "--external-port",
            "443",
            "--exposure",
            "gateway",
        ]);
        assert_eq!(cfg.domain, "example.com");
        assert_eq!(cfg.external_port, 443);
        assert_eq!(cfg.exposure, Exposure::Gateway);
    }

    #[test]
    fn test_config_map_overlay() {
        let mut cfg = OperatorConfig::parse_from(["kflex", "--domain", "a.example"]);
        let mut data = BTreeMap::new();
        data.insert("domain".to_string(), "b.example".to_string());
        data.insert("externalPort".to_string(), "8443".to_string());
        data.insert("isOpenShift".to_string(), "true".to_string());
        cfg.apply_config_map(&data);

        assert_eq!(cfg.domain, "b.example");
        assert_eq!(cfg.external_port, 8443);
        assert!(cfg.is_openshift);
        assert_eq!(cfg.effective_exposure(), Exposure::Route);
    }

    #[test]
    fn test_config_map_invalid_values_are_ignored() {
        let mut cfg = OperatorConfig::parse_from(["kflex", "--external-port", "9443"]);
        let mut data = BTreeMap::new();
        data.insert("externalPort".to_string(), "not-a-port".to_string());
        data.insert("exposure".to_string(), "carrier-pigeon".to_string());
        data.insert("domain".to_string(), String::new());
        let domain = cfg.domain.clone();
        cfg.apply_config_map(&data);

        assert_eq!(cfg.external_port, 9443);
        assert_eq!(cfg.exposure, Exposure::Ingress);
        assert_eq!(cfg.domain, domain);
    }

    #[test]
    fn test_exposure_from_str() {
        assert_eq!("Gateway".parse::<Exposure>(), Ok(Exposure::Gateway));
        assert_eq!("route".parse::<Exposure>(), Ok(Exposure::Route));
        assert!("nodeport".parse::<Exposure>().is_err());
    }

    #[test]
    fn test_chart_refs() {
        let cfg = OperatorConfig::parse_from(["kflex", "--vcluster-chart-version", "0.20.0"]);
        let chart = cfg.vcluster_chart_ref();
        assert_eq!(chart.chart, "vcluster");
        assert_eq!(chart.version, "0.20.0");
        assert!(cfg.ocm_chart_ref().chart.starts_with("oci://"));
    }
}
