// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `gotemplate.rs`

#[cfg(test)]
mod tests {
    use crate::gotemplate::{render, TemplateError};
    use std::collections::BTreeMap;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_field_references() {
        let vars = vars(&[("Name", "cp1"), ("Namespace", "cp1-system")]);
        assert_eq!(render("{{.Name}}", &vars).unwrap(), "cp1");
        assert_eq!(render("a-{{ .Name }}-b", &vars).unwrap(), "a-cp1-b");
        assert_eq!(
            render("{{.Name}}/{{ $.Namespace }}", &vars).unwrap(),
            "cp1/cp1-system"
        );
        assert_eq!(render("no actions", &vars).unwrap(), "no actions");
    }

    #[test]
    fn test_if_else_chain() {
        let template = "{{if eq .tier \"gold\"}}3{{else if eq .tier \"silver\"}}2{{else}}1{{end}}";
        assert_eq!(render(template, &vars(&[("tier", "gold")])).unwrap(), "3");
        assert_eq!(render(template, &vars(&[("tier", "silver")])).unwrap(), "2");
        assert_eq!(render(template, &vars(&[("tier", "bronze")])).unwrap(), "1");
    }

    #[test]
    fn test_if_uses_go_truthiness() {
        let template = "{{if .Flag}}on{{else}}off{{end}}";
        assert_eq!(render(template, &vars(&[("Flag", "true")])).unwrap(), "on");
        assert_eq!(render(template, &vars(&[("Flag", "false")])).unwrap(), "on");
        assert_eq!(render(template, &vars(&[("Flag", "")])).unwrap(), "off");
        assert_eq!(
            render("{{if and .a (not .b)}}yes{{end}}", &vars(&[("a", "x"), ("b", "")])).unwrap(),
            "yes"
        );
    }

    #[test]
    fn test_range_over_variables_in_key_order() {
        let vars = vars(&[("b", "2"), ("a", "1")]);
        assert_eq!(
            render("{{range $k, $v := .}}{{$k}}={{$v}};{{end}}", &vars).unwrap(),
            "a=1;b=2;"
        );
        assert_eq!(render("{{range .}}[{{.}}]{{end}}", &vars).unwrap(), "[1][2]");
    }

    #[test]
    fn test_range_over_integer_and_else() {
        let empty = BTreeMap::new();
        assert_eq!(render("{{range $i := 3}}{{$i}}{{end}}", &empty).unwrap(), "012");
        assert_eq!(render("{{range 0}}x{{else}}none{{end}}", &empty).unwrap(), "none");
    }

    #[test]
    fn test_with_rebinds_dot() {
        let template = "{{with .region}}region={{.}}{{else}}global{{end}}";
        assert_eq!(render(template, &vars(&[("region", "eu")])).unwrap(), "region=eu");
        assert_eq!(render(template, &vars(&[("region", "")])).unwrap(), "global");
    }

    #[test]
    fn test_variables_and_pipelines() {
        let vars = vars(&[("Name", "cp1")]);
        assert_eq!(
            render("{{ $n := .Name }}{{ $n | printf \"%s-admin\" }}", &vars).unwrap(),
            "cp1-admin"
        );
        assert_eq!(render("{{ len .Name }}", &vars).unwrap(), "3");
        assert_eq!(render("{{ print 1 2 \"x\" }}", &vars).unwrap(), "1 2x");
        assert_eq!(render("{{ printf \"%q/%d\" .Name 7 }}", &vars).unwrap(), "\"cp1\"/7");
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let vars = vars(&[("Name", "cp1")]);
        assert_eq!(
            render("a  \n {{- .Name -}} \n  b", &vars).unwrap(),
            "acp1b"
        );
        assert_eq!(render("x{{/* ignored */}}y", &vars).unwrap(), "xy");
        assert_eq!(render("x {{- /* ignored */ -}} y", &vars).unwrap(), "xy");
    }

    #[test]
    fn test_jinja_syntax_is_plain_text() {
        let vars = vars(&[("Name", "cp1")]);
        assert_eq!(
            render("{% if x %}{# c #}{{.Name}}", &vars).unwrap(),
            "{% if x %}{# c #}cp1"
        );
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = render("name: {{.missing}}", &BTreeMap::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingKey("missing".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        let empty = BTreeMap::new();
        for template in [
            "{{ unclosed",
            "{{if .a}}open",
            "{{end}}",
            "{{ upper .a }}",
            "{{ $undeclared }}",
            "{{ define \"x\" }}{{ end }}",
        ] {
            let err = render(template, &empty).unwrap_err();
            assert!(
                matches!(err, TemplateError::Parse(_)),
                "{template}: {err:?}"
            );
        }
    }

    #[test]
    fn test_comparison_of_mixed_types_fails() {
        let err = render("{{ lt .a 1 }}", &vars(&[("a", "x")])).unwrap_err();
        assert!(matches!(err, TemplateError::Execute(_)));
    }
}
