use std::collections::BTreeMap;

use tera::{Context, Tera};
use thiserror::Error;

pub const ALERT_6H: &str = "alert_6h";
pub const ALERT_12H: &str = "alert_12h";
pub const ALERT_FINAL: &str = "alert_final";
pub const MANAGER_ESCALATION: &str = "manager_escalation";
pub const CLOSURE_CHECKLIST: &str = "closure_checklist";
pub const CUSTOM_ORDER_CHECKLIST: &str = "custom_order_checklist";

const ALERT_TEMPLATES: &[&str] = &[ALERT_6H, ALERT_12H, ALERT_FINAL, MANAGER_ESCALATION];
const FINDINGS_TEMPLATES: &[&str] = &[CLOSURE_CHECKLIST, CUSTOM_ORDER_CHECKLIST];

/// Whether `name` is a template an alert threshold can render.
pub fn is_alert_template(name: &str) -> bool {
    ALERT_TEMPLATES.contains(&name)
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{name}` failed to compile: {source}")]
    Compile { name: String, source: tera::Error },
    #[error("template `{name}` failed to render: {source}")]
    Render { name: String, source: tera::Error },
    #[error("unknown template `{0}`")]
    Unknown(String),
}

fn default_sources() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        (
            ALERT_6H,
            "⚠️ {{ agent_name }}, o cliente {{ client_name }} está aguardando orçamento há 6 horas úteis. Por favor, responda.",
        ),
        (
            ALERT_12H,
            "⚠️ {{ agent_name }}, o cliente {{ client_name }} continua aguardando orçamento há 12 horas úteis. Priorize este atendimento.",
        ),
        (
            ALERT_FINAL,
            "🚨 {{ agent_name }}, o cliente {{ client_name }} aguarda orçamento há 18 horas úteis. Sem resposta nos próximos minutos, a gerência será acionada.",
        ),
        (
            MANAGER_ESCALATION,
            "🚨 Gerência: o cliente {{ client_name }} segue sem resposta de {{ agent_name }} após o alerta final de 18 horas úteis.",
        ),
        (
            CLOSURE_CHECKLIST,
            "📋 {{ agent_name }}, faltam informações para fechar o pedido de {{ client_name }}:\n{% for item in findings %}- {{ item }}\n{% endfor %}",
        ),
        (
            CUSTOM_ORDER_CHECKLIST,
            "🛠️ {{ agent_name }}, o pedido sob encomenda de {{ client_name }} ainda não está formalizado:\n{% for item in findings %}- {{ item }}\n{% endfor %}",
        ),
    ])
}

/// Fixed-format notification texts.
///
/// Alert templates receive `agent_name` and `client_name`; checklist templates also receive
/// `findings`. Every template is test-rendered at construction, so a bad override fails at
/// boot rather than at dispatch.
#[derive(Clone, Debug)]
pub struct MessageTemplates {
    tera: Tera,
}

impl MessageTemplates {
    pub fn new(overrides: &BTreeMap<String, String>) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        for (name, source) in default_sources() {
            let source = overrides.get(name).map(String::as_str).unwrap_or(source);
            tera.add_raw_template(name, source)
                .map_err(|source| TemplateError::Compile { name: name.to_string(), source })?;
        }
        if let Some(unknown) = overrides.keys().find(|key| !default_sources().contains_key(key.as_str())) {
            return Err(TemplateError::Unknown(unknown.clone()));
        }

        let templates = Self { tera };
        for name in ALERT_TEMPLATES {
            templates.render_alert(name, "agent", "client")?;
        }
        for name in FINDINGS_TEMPLATES {
            templates.render_findings(name, "agent", "client", &["finding".to_string()])?;
        }
        Ok(templates)
    }

    pub fn render_alert(
        &self,
        name: &str,
        agent_name: &str,
        client_name: &str,
    ) -> Result<String, TemplateError> {
        let mut context = Context::new();
        context.insert("agent_name", agent_name);
        context.insert("client_name", client_name);
        self.render(name, &context)
    }

    pub fn render_findings(
        &self,
        name: &str,
        agent_name: &str,
        client_name: &str,
        findings: &[String],
    ) -> Result<String, TemplateError> {
        let mut context = Context::new();
        context.insert("agent_name", agent_name);
        context.insert("client_name", client_name);
        context.insert("findings", findings);
        self.render(name, &context)
    }

    fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        self.tera
            .render(name, context)
            .map_err(|source| TemplateError::Render { name: name.to_string(), source })
    }
}

impl Default for MessageTemplates {
    fn default() -> Self {
        let mut tera = Tera::default();
        for (name, source) in default_sources() {
            // Built-in sources are covered by tests; a failure here leaves the name unregistered
            // and surfaces as a render error at dispatch.
            let _ = tera.add_raw_template(name, source);
        }
        Self { tera }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{MessageTemplates, TemplateError, ALERT_6H, CLOSURE_CHECKLIST};

    #[test]
    fn defaults_compile_and_render_placeholders() {
        let templates = MessageTemplates::new(&BTreeMap::new()).expect("defaults compile");
        let text = templates.render_alert(ALERT_6H, "Carla", "Maria").expect("render");

        assert!(text.contains("Carla"));
        assert!(text.contains("Maria"));
    }

    #[test]
    fn findings_are_listed_one_per_line() {
        let templates = MessageTemplates::default();
        let text = templates
            .render_findings(
                CLOSURE_CHECKLIST,
                "Carla",
                "Maria",
                &["voltagem".to_string(), "prazo".to_string()],
            )
            .expect("render");

        assert!(text.contains("- voltagem\n- prazo\n"));
    }

    #[test]
    fn override_missing_a_required_placeholder_source_is_rejected() {
        let overrides =
            BTreeMap::from([(ALERT_6H.to_string(), "{{ agent_name }} {{ customer }}".to_string())]);

        assert!(matches!(
            MessageTemplates::new(&overrides),
            Err(TemplateError::Render { ref name, .. }) if name == ALERT_6H
        ));
    }

    #[test]
    fn unknown_override_names_are_rejected() {
        let overrides = BTreeMap::from([("alert_99h".to_string(), "hi".to_string())]);
        assert!(matches!(MessageTemplates::new(&overrides), Err(TemplateError::Unknown(_))));
    }
}
