use serde_json::{Map, Value};

pub const CREATE_ORDER: &str = "create_order";
pub const REMINDER: &str = "reminder";
pub const CANCELLATION: &str = "cancellation";
pub const REACTIVATION: &str = "reactivation";

/// Subject plus the provider-side template name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmailTemplate {
    pub subject: &'static str,
    pub template: &'static str,
}

pub fn lookup(name: &str) -> EmailTemplate {
    match name {
        CREATE_ORDER => EmailTemplate {
            subject: "💙 Mantén tu cobertura Appa activa",
            template: "Cuota creada",
        },
        REMINDER => EmailTemplate {
            subject: "🐾 Tu cobertura Appa sigue pendiente de pago",
            template: "Recordatorio dia 1 - 7 - 14 -27",
        },
        CANCELLATION => EmailTemplate {
            subject: "🚫 Tu póliza ha sido cancelada (puedes reactivarla)",
            template: "Cancelación",
        },
        REACTIVATION => EmailTemplate {
            subject: "💙 Vuelve a estar protegido con Appa (preexistencias aplican)",
            template: "Cancelación",
        },
        _ => EmailTemplate::default(),
    }
}

/// Variables a billing email can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailVars {
    pub display_name: String,
    pub pets: Vec<String>,
    pub pay_url: String,
    pub days_left: i64,
}

impl EmailVars {
    /// Only set fields are merged: empty strings, an empty pet list and a non-positive day count
    /// are left out so the provider template falls back to its own defaults.
    pub fn sparse(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        if !self.display_name.is_empty() {
            vars.insert("display_name".into(), Value::from(self.display_name.clone()));
        }
        if !self.pay_url.is_empty() {
            vars.insert("order_no".into(), Value::from(self.pay_url.clone()));
        }
        if !self.pets.is_empty() {
            vars.insert("date".into(), Value::from(self.pets.clone()));
        }
        if self.days_left > 0 {
            vars.insert("days_left".into(), Value::from(self.days_left));
        }
        vars
    }
}
