//! Field Schema for the customer onboarding record
//!
//! A fixed, flat table of canonical field names with their semantic kind, the
//! form step that owns them and any default or constraint. The extraction
//! pipeline, validation and persistence all read from this one table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Reserved prefix for pipeline bookkeeping fields (`_ocrSuccess`, ...)
pub const META_PREFIX: char = '_';

/// Semantic type of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text
    Text,
    /// Free text that must be empty or an email address
    Email,
    /// ISO date (`YYYY-MM-DD`) or RFC 3339 datetime
    Date,
    /// Boolean flag
    Flag,
    /// Amount carried as text (`650000.00`)
    Decimal,
}

/// The six linear form steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStep {
    RequestData,
    GeneralData,
    SalesArea,
    Recipients,
    FinancialConditions,
    ApprovedConditions,
}

impl FormStep {
    pub const ALL: [FormStep; 6] = [
        FormStep::RequestData,
        FormStep::GeneralData,
        FormStep::SalesArea,
        FormStep::Recipients,
        FormStep::FinancialConditions,
        FormStep::ApprovedConditions,
    ];

    /// 1-based step number as shown in the step indicator
    pub fn number(self) -> u8 {
        match self {
            FormStep::RequestData => 1,
            FormStep::GeneralData => 2,
            FormStep::SalesArea => 3,
            FormStep::Recipients => 4,
            FormStep::FinancialConditions => 5,
            FormStep::ApprovedConditions => 6,
        }
    }

    pub fn from_number(number: u8) -> Option<FormStep> {
        FormStep::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    pub fn title(self) -> &'static str {
        match self {
            FormStep::RequestData => "DATOS SOLICITUD",
            FormStep::GeneralData => "DATOS GENERALES",
            FormStep::SalesArea => "DATOS AREA VENTAS",
            FormStep::Recipients => "DESTINATARIOS",
            FormStep::FinancialConditions => "CONDICIONES FINANCIERAS",
            FormStep::ApprovedConditions => "CONDICIONES APROBADAS",
        }
    }

    pub fn next(self) -> Option<FormStep> {
        FormStep::from_number(self.number() + 1)
    }

    pub fn previous(self) -> Option<FormStep> {
        FormStep::from_number(self.number() - 1)
    }

    /// Fields owned by this step, in schema order
    pub fn fields(self) -> impl Iterator<Item = &'static FieldSpec> {
        FIELD_SCHEMA.iter().filter(move |spec| spec.step == self)
    }
}

/// Default value for a field when nothing was extracted or entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Text(&'static str),
    Flag(bool),
}

/// One entry of the Field Schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical (wire) name, e.g. `CALLE`
    pub name: &'static str,
    pub kind: FieldKind,
    pub step: FormStep,
    /// Must be non-blank on submission
    pub required: bool,
    /// Storage enforces uniqueness on this field
    pub unique: bool,
    pub default: Option<FieldDefault>,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind, step: FormStep) -> Self {
        Self {
            name,
            kind,
            step,
            required: false,
            unique: false,
            default: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn default_text(mut self, value: &'static str) -> Self {
        self.default = Some(FieldDefault::Text(value));
        self
    }

    const fn default_flag(mut self, value: bool) -> Self {
        self.default = Some(FieldDefault::Flag(value));
        self
    }

    /// Storage column name (`CALLE` → `calle`)
    pub fn column(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

use FieldKind::{Date, Decimal, Email, Flag, Text};
use FormStep::{
    ApprovedConditions, FinancialConditions, GeneralData, Recipients, RequestData, SalesArea,
};

/// The complete Field Schema (all six steps)
pub static FIELD_SCHEMA: &[FieldSpec] = &[
    // Step 1: request data
    FieldSpec::new("CENTRO", Text, RequestData),
    FieldSpec::new("FECHA_SOLICITUD_ALTA", Date, RequestData),
    FieldSpec::new("FECHA_RECEPCION", Date, RequestData),
    FieldSpec::new("CANAL", Text, RequestData),
    FieldSpec::new("SECTOR", Text, RequestData),
    FieldSpec::new("NO_PROVEEDOR", Text, RequestData),
    FieldSpec::new("COND_PAGO_PROV", Text, RequestData),
    FieldSpec::new("DADO_DE_ALTA_COMO_PROVEEDOR", Text, RequestData),
    FieldSpec::new("ABIERTO_COMO_CLIENTE", Flag, RequestData).default_flag(false),
    FieldSpec::new("CENTRO_ORIGEN", Text, RequestData),
    // Step 2: general data
    FieldSpec::new("NUMERO_CLIENTE", Text, GeneralData),
    FieldSpec::new("NOMBRE", Text, GeneralData).required(),
    FieldSpec::new("CIF", Text, GeneralData).required().unique(),
    FieldSpec::new("CONCEPTO_BUSQUEDA", Text, GeneralData),
    FieldSpec::new("RAMO", Text, GeneralData),
    FieldSpec::new("CALLE", Text, GeneralData),
    FieldSpec::new("NUMERO", Text, GeneralData),
    FieldSpec::new("COD_POSTAL", Text, GeneralData),
    FieldSpec::new("POBLACION", Text, GeneralData),
    FieldSpec::new("REGION", Text, GeneralData),
    FieldSpec::new("PAIS", Text, GeneralData),
    FieldSpec::new("APDO_CORREOS", Text, GeneralData),
    FieldSpec::new("POBL_APDO", Text, GeneralData),
    FieldSpec::new("COD_APDO", Text, GeneralData),
    FieldSpec::new("IDIOMA", Text, GeneralData),
    FieldSpec::new("TIPO_CLIENTE", Text, GeneralData),
    FieldSpec::new("PERSONA_CONTACTO_ENVIO_FACTURA_EMAIL", Text, GeneralData),
    FieldSpec::new("EMAIL_ENVIO_FACTURA", Email, GeneralData),
    FieldSpec::new("TELEFONO_1", Text, GeneralData),
    FieldSpec::new("NOMBRE_PERSONA_CONTACTO", Text, GeneralData),
    FieldSpec::new("APELLIDO", Text, GeneralData),
    FieldSpec::new("TELEFONO", Text, GeneralData),
    FieldSpec::new("EMAIL_PERSONA_CONTACTO", Email, GeneralData),
    FieldSpec::new("TEXTOS_INFORMATIVOS", Text, GeneralData),
    FieldSpec::new("CODIGO_IBAN", Text, GeneralData),
    FieldSpec::new("HORARIO_DE_DESCARGA", Text, GeneralData),
    FieldSpec::new("PERSONA_CONTACTO", Text, GeneralData),
    // Step 3: sales area data
    FieldSpec::new("GRUPO_VENDEDORES", Text, SalesArea),
    FieldSpec::new("OFICINA_VENTAS", Text, SalesArea),
    FieldSpec::new("MONEDA", Text, SalesArea).default_text("EUR"),
    FieldSpec::new("COND_EXP", Text, SalesArea),
    FieldSpec::new("ZONA_DE_VENTAS", Text, SalesArea),
    FieldSpec::new("INCOTERM", Text, SalesArea),
    FieldSpec::new("CALENDARIO_FACTURACION", Text, SalesArea),
    FieldSpec::new("VALORACION_PORTES", Text, SalesArea),
    FieldSpec::new("TIPO_FACTURACION", Text, SalesArea),
    FieldSpec::new("CERTIFICADOS", Text, SalesArea),
    FieldSpec::new("FACT_EMAIL", Email, SalesArea),
    FieldSpec::new("CLASE_ABC", Text, SalesArea),
    FieldSpec::new("PROCEDIMIENTO_RECLAMACION", Text, SalesArea),
    FieldSpec::new("E_MAIL_RECLAMACION", Email, SalesArea),
    // Step 4: recipients
    FieldSpec::new("DESTINATARIO_MERCANCIA_NOMBRE", Text, Recipients),
    FieldSpec::new("DESTINATARIO_MERCANCIA_CALLE", Text, Recipients),
    FieldSpec::new("DESTINATARIO_MERCANCIA_NUMERO", Text, Recipients),
    FieldSpec::new("DESTINATARIO_MERCANCIA_COD_POSTAL", Text, Recipients),
    FieldSpec::new("DESTINATARIO_MERCANCIA_POBLACION", Text, Recipients),
    FieldSpec::new("DESTINATARIO_MERCANCIA_PAIS", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_NOMBRE", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_CALLE", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_NUMERO", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_COD_POSTAL", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_POBLACION", Text, Recipients),
    FieldSpec::new("DESTINATARIO_FACTURA_PAIS", Text, Recipients),
    // Step 5: financial conditions
    FieldSpec::new("V_PAGO", Text, FinancialConditions),
    FieldSpec::new("COND_PAGO", Text, FinancialConditions),
    FieldSpec::new("FORMA_PAGO", Text, FinancialConditions),
    FieldSpec::new("DESCUENTO_PP", Text, FinancialConditions),
    FieldSpec::new("GASTOS_FIN", Text, FinancialConditions),
    FieldSpec::new("DIAS_MEDIOS_PAGO", Text, FinancialConditions),
    FieldSpec::new("VENTAS_ESTIMADAS_ANO_EUROS", Decimal, FinancialConditions),
    FieldSpec::new("VENTAS_LIMITADAS_EUROS", Decimal, FinancialConditions),
    FieldSpec::new("CREDITO_SOLICITADO_EUROS", Decimal, FinancialConditions),
    FieldSpec::new("LIMITE_CREDITO", Decimal, FinancialConditions),
    FieldSpec::new("OBSERVACIONES_FINANCIERAS", Text, FinancialConditions),
    // Step 6: approved conditions (internal)
    FieldSpec::new("CREDITO_CONCEDIDO_EUROS", Decimal, ApprovedConditions),
    FieldSpec::new("DPP_OFICIAL", Text, ApprovedConditions),
    FieldSpec::new("G_FINANCIERO_OFICIAL", Text, ApprovedConditions),
    FieldSpec::new("FECHA_APROBACION", Date, ApprovedConditions),
    FieldSpec::new("APROBADO_POR", Text, ApprovedConditions),
    FieldSpec::new("ESTADO_APROBACION", Text, ApprovedConditions).default_text("pending"),
    FieldSpec::new("NOTAS_APROBACION", Text, ApprovedConditions),
];

static FIELD_INDEX: Lazy<HashMap<&'static str, &'static FieldSpec>> =
    Lazy::new(|| FIELD_SCHEMA.iter().map(|spec| (spec.name, spec)).collect());

/// Look up a canonical field by name
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    FIELD_INDEX.get(name).copied()
}

/// True for keys in the reserved meta-field namespace
pub fn is_meta_key(key: &str) -> bool {
    key.starts_with(META_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_unique() {
        let names: HashSet<_> = FIELD_SCHEMA.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), FIELD_SCHEMA.len());
    }

    #[test]
    fn test_every_step_owns_fields() {
        for step in FormStep::ALL {
            assert!(step.fields().count() > 0, "{:?} has no fields", step);
        }
        assert_eq!(FormStep::Recipients.fields().count(), 12);
    }

    #[test]
    fn test_step_navigation() {
        assert_eq!(FormStep::from_number(1), Some(FormStep::RequestData));
        assert_eq!(FormStep::from_number(0), None);
        assert_eq!(FormStep::from_number(7), None);
        assert_eq!(FormStep::RequestData.previous(), None);
        assert_eq!(FormStep::ApprovedConditions.next(), None);
        assert_eq!(FormStep::SalesArea.next(), Some(FormStep::Recipients));
    }

    #[test]
    fn test_lookup_and_constraints() {
        let cif = field("CIF").unwrap();
        assert!(cif.required && cif.unique);
        assert_eq!(cif.column(), "cif");
        assert_eq!(field("MONEDA").unwrap().default, Some(FieldDefault::Text("EUR")));
        assert!(field("_ocrSuccess").is_none());
        assert!(is_meta_key("_ocrSuccess"));
        assert!(!is_meta_key("CALLE"));
    }
}
