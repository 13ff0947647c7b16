//! User data templating
//!
//! User data may reference the machine it boots with `{{ .Machine.Name }}`,
//! `{{ .Machine.Namespace }}` and `{{ .MachineSpec.<Field> }}`, where
//! `<Field>` is a provider spec field in its exported form (`Flavor`,
//! `ServerGroupID`, ...). Anything else between braces is an error.

use crds::{Machine, OpenstackProviderSpec};
use kube::ResourceExt;
use serde_json::Value;
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Scalar and string-list fields of the provider spec, by JSON key.
/// Empty fields are omitted when the spec serializes, so presence alone
/// cannot tell a valid field from a typo.
const SPEC_FIELDS: &[&str] = &[
    "apiVersion",
    "kind",
    "cloudName",
    "flavor",
    "image",
    "keyName",
    "sshUserName",
    "floatingIP",
    "availabilityZone",
    "trunk",
    "tags",
    "configDrive",
    "serverGroupID",
    "serverGroupName",
    "primarySubnet",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("can't evaluate {0}")]
    UnknownField(String),

    #[error("field {0} is not a scalar value")]
    NotScalar(String),
}

/// Render `template` for `machine`.
pub fn render(template: &str, machine: &Machine, spec: &OpenstackProviderSpec) -> Result<String, TemplateError> {
    let spec_value = serde_json::to_value(spec).unwrap_or(Value::Null);
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or(TemplateError::Unclosed(offset + start))?;
        let expression = after_open[..end].trim();
        rendered.push_str(&evaluate(expression, machine, &spec_value)?);

        let consumed = start + OPEN.len() + end + CLOSE.len();
        rest = &rest[consumed..];
        offset += consumed;
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn evaluate(expression: &str, machine: &Machine, spec: &Value) -> Result<String, TemplateError> {
    match expression {
        ".Machine.Name" => return Ok(machine.name_any()),
        ".Machine.Namespace" => return Ok(machine.namespace().unwrap_or_default()),
        _ => {}
    }

    let field = expression
        .strip_prefix(".MachineSpec.")
        .filter(|field| !field.is_empty() && !field.contains('.'))
        .ok_or_else(|| TemplateError::UnknownField(expression.to_string()))?;
    let key = json_key(field);
    if !SPEC_FIELDS.contains(&key.as_str()) {
        return Err(TemplateError::UnknownField(expression.to_string()));
    }

    match spec.get(&key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Array(items)) => {
            let items = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| TemplateError::NotScalar(expression.to_string()))?;
            Ok(format!("[{}]", items.join(" ")))
        }
        Some(Value::Object(_)) => Err(TemplateError::NotScalar(expression.to_string())),
    }
}

/// `ServerGroupID` -> `serverGroupID`
fn json_key(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::MachineSpec;

    fn machine() -> Machine {
        let mut machine = Machine::new("master-0", MachineSpec::default());
        machine.metadata.namespace = Some("openshift-machine-api".to_string());
        machine
    }

    fn spec() -> OpenstackProviderSpec {
        OpenstackProviderSpec {
            flavor: "m1.large".to_string(),
            server_group_id: "sg-1".to_string(),
            trunk: true,
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_renders_machine_and_spec_fields() {
        let template = "name={{ .Machine.Name }} ns={{.Machine.Namespace}} flavor={{ .MachineSpec.Flavor }} \
                        group={{ .MachineSpec.ServerGroupID }} trunk={{ .MachineSpec.Trunk }} tags={{ .MachineSpec.Tags }}";

        let rendered = render(template, &machine(), &spec()).unwrap();
        assert_eq!(
            rendered,
            "name=master-0 ns=openshift-machine-api flavor=m1.large group=sg-1 trunk=true tags=[a b]"
        );
    }

    #[test]
    fn test_text_without_actions_is_unchanged() {
        let template = "#cloud-config\nruncmd:\n  - echo {not an action}\n";
        assert_eq!(render(template, &machine(), &spec()).unwrap(), template);
    }

    #[test]
    fn test_empty_known_field_renders_empty() {
        assert_eq!(render("[{{ .MachineSpec.KeyName }}]", &machine(), &spec()).unwrap(), "[]");
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            render("{{ .Machine.Labels }}", &machine(), &spec()),
            Err(TemplateError::UnknownField(".Machine.Labels".to_string()))
        );
        assert_eq!(
            render("{{ .MachineSpec.Flavour }}", &machine(), &spec()),
            Err(TemplateError::UnknownField(".MachineSpec.Flavour".to_string()))
        );
        assert_eq!(
            render("abc {{ .Machine.Name", &machine(), &spec()),
            Err(TemplateError::Unclosed(4))
        );
    }
}
