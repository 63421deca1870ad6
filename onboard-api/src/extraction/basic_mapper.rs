//! Deterministic OCR → schema mapper
//!
//! Used when the generative mapping service has no usable credential or
//! fails. Reads the nested business-report structure the OCR service emits
//! (`company_identification`, `creditworthiness`, `business_activity`, ...)
//! and fills the fields it can find. Only non-empty values are emitted.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use onboard_common::record::format_number;
use onboard_common::CanonicalRecord;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{ExtractionError, FieldMapper, RawExtraction};

static HOUSE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+").expect("valid house number regex"));
static NON_AMOUNT_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\d,]").expect("valid amount regex"));

static NULL: Value = Value::Null;

const DEFAULT_COUNTRY: &str = "Deutschland";
const RAMO_MAX_CHARS: usize = 100;
const SEARCH_CONCEPT_CHARS: usize = 10;

/// Address components pulled out of the OCR address block
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub number: String,
    pub postal_code: String,
    pub city: String,
    pub country: String,
}

/// Split a trailing house number off a street line.
///
/// `"Stadtring Nordhorn 111"` → `("Stadtring Nordhorn", "111")`
pub fn split_street(street: &str) -> (String, String) {
    let mut parts: Vec<&str> = street.split(' ').collect();
    match parts.last() {
        Some(last) if HOUSE_NUMBER_RE.is_match(last) => {
            let number = last.to_string();
            parts.pop();
            (parts.join(" "), number)
        }
        _ => (street.to_string(), String::new()),
    }
}

/// Parse the address block: an object, or a legacy
/// `"Street 111, 33334 City, Country"` string
pub fn parse_address(address: &Value) -> AddressParts {
    match address {
        Value::Object(_) => {
            let (street, number) = split_street(&text_at(address, &["street"]));
            AddressParts {
                street,
                number,
                postal_code: text_at(address, &["zip_code"])
                    .or_if_empty(|| text_at(address, &["postal_code"])),
                city: text_at(address, &["city"]),
                country: text_at(address, &["country"]),
            }
        }
        Value::String(line) => {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 3 {
                return AddressParts::default();
            }
            let mut street_tokens: Vec<&str> = parts[0].split(' ').collect();
            let number = street_tokens.pop().unwrap_or_default().to_string();
            let (postal_code, city) = match parts[1].split_once(' ') {
                Some((code, city)) => (code.to_string(), city.to_string()),
                None => (parts[1].to_string(), String::new()),
            };
            AddressParts {
                street: street_tokens.join(" "),
                number,
                postal_code,
                city,
                country: parts[2].to_string(),
            }
        }
        _ => AddressParts::default(),
    }
}

/// Normalise a credit limit to a plain decimal string.
///
/// Numbers render as-is (integral values without a fraction). Strings keep
/// only digits and commas, then the first comma becomes the decimal point:
/// `"650.000,00"` → `"650000.00"`.
pub fn normalize_credit_limit(value: &Value) -> String {
    match value {
        Value::Number(n) if n.as_f64() != Some(0.0) => format_number(n),
        Value::String(s) => NON_AMOUNT_CHARS_RE
            .replace_all(s, "")
            .replacen(',', ".", 1),
        _ => String::new(),
    }
}

/// Last whitespace-separated token of a person's name
pub fn surname(full_name: &str) -> String {
    full_name.rsplit(' ').next().unwrap_or_default().to_string()
}

/// Form language code from a country name
pub fn infer_language(country: &str) -> &'static str {
    let country = country.to_lowercase();
    if country.contains("deutsch") || country.contains("germany") {
        "DE"
    } else if country.contains("france") || country.contains("francia") {
        "FR"
    } else {
        "ES"
    }
}

/// Short upper-case search key from a company name
pub fn search_concept(name: &str) -> String {
    name.chars()
        .take(SEARCH_CONCEPT_CHARS)
        .flat_map(char::to_uppercase)
        .map(|c| if c.is_ascii_uppercase() || c.is_ascii_digit() { c } else { ' ' })
        .collect()
}

/// `"Employees: <latest year count>. <purpose>"`
fn info_text(financial: &Value, business: &Value) -> String {
    let employees = financial
        .pointer("/employees_and_revenue/employees")
        .and_then(Value::as_object);
    let count = employees
        .and_then(|by_year| by_year.keys().max().and_then(|year| by_year.get(year)))
        .and_then(scalar_text)
        .unwrap_or_default();
    let purpose = truncate_chars(
        &text_at(business, &["registered_purpose"])
            .or_if_empty(|| text_at(business, &["registered_business_purpose"])),
        RAMO_MAX_CHARS,
    );
    if count.is_empty() && purpose.is_empty() {
        return String::new();
    }
    format!("Employees: {}. {}", count, purpose).trim().to_string()
}

/// Credit index, probability of default and its description
fn financial_notes(creditworthiness: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(index) = creditworthiness.pointer("/bonitaetsindex2_0/value").and_then(scalar_text) {
        parts.push(format!("Bonitätsindex: {}", index));
    }
    let pd = creditworthiness.get("pd_probability_of_default");
    if let Some(value) = pd.and_then(|pd| pd.get("value")).and_then(scalar_text) {
        parts.push(format!("PD: {}", value));
    }
    if let Some(description) = pd.and_then(|pd| pd.get("description")).and_then(scalar_text) {
        parts.push(description);
    }
    parts.retain(|p| !p.is_empty());
    parts.join(". ")
}

/// Strip response envelopes: `data`/`result` wrappers, JSON-in-a-string,
/// then an optional `response` object
pub fn unwrap_response(raw: &Value) -> Value {
    let mut data = raw;
    if let Some(inner) = raw.get("data").filter(|v| is_truthy(v)) {
        data = inner;
    }
    if let Some(inner) = raw.get("result").filter(|v| is_truthy(v)) {
        data = inner;
    }

    let parsed;
    if let Value::String(body) = data {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => {
                parsed = value;
                data = &parsed;
            }
            Err(e) => debug!(error = %e, "OCR payload is a string but not JSON"),
        }
    }

    data.get("response")
        .filter(|v| v.is_object())
        .unwrap_or(data)
        .clone()
}

/// Map a raw OCR payload to a record
pub fn map_value(raw: &Value) -> CanonicalRecord {
    let response = unwrap_response(raw);

    let company = section(&response, "company_identification");
    let general = section(&response, "general_information");
    let creditworthiness = section(&response, "creditworthiness");
    let business = section(&response, "business_activity");
    let financial = section(&response, "financial_figures");
    let management = section(&response, "management_and_representation");
    let registration = section(company, "registration_details");
    let contact = company
        .get("contact")
        .or_else(|| company.get("contact_information"))
        .unwrap_or(&NULL);

    let address = parse_address(section(company, "address"));
    let country = if address.country.is_empty() {
        DEFAULT_COUNTRY.to_string()
    } else {
        address.country.clone()
    };

    let name = text_at(company, &["name"])
        .or_if_empty(|| text_at(company, &["company_name"]))
        .or_if_empty(|| text_at(general, &["company_name_short"]));
    let tax_id = text_at(registration, &["vat_id"])
        .or_if_empty(|| text_at(company, &["vat_id"]))
        .or_if_empty(|| text_at(company, &["vat_id_number"]))
        .or_if_empty(|| text_at(company, &["tax_number"]));
    let legal_form =
        text_at(registration, &["legal_form"]).or_if_empty(|| text_at(company, &["legal_form"]));
    let email = text_at(contact, &["email"]).or_if_empty(|| text_at(company, &["email"]));
    let phone = text_at(contact, &["phone"]).or_if_empty(|| text_at(company, &["phone"]));

    let director = management
        .get("managing_directors")
        .and_then(|d| d.get(0))
        .map(|d| text_at(d, &["name"]))
        .unwrap_or_default();

    let credit_limit =
        normalize_credit_limit(section(creditworthiness, "credit_limit_eur"));

    let certifications = business
        .get("certifications")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(scalar_text)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let mut record = CanonicalRecord::new();
    let mut put = |field: &str, value: String| {
        if !value.is_empty() {
            record.set_text(field, value);
        }
    };

    put("NUMERO_CLIENTE", text_at(general, &["member_id"]));
    put("CONCEPTO_BUSQUEDA", search_concept(&name));
    put("NOMBRE", name);
    put("CIF", tax_id);
    put(
        "RAMO",
        truncate_chars(&text_at(business, &["registered_business_purpose"]), RAMO_MAX_CHARS),
    );
    put("CALLE", address.street);
    put("NUMERO", address.number);
    put("COD_POSTAL", address.postal_code);
    put("POBLACION", address.city);
    put("IDIOMA", infer_language(&country).to_string());
    put("PAIS", country);
    put("TIPO_CLIENTE", legal_form);
    put("APELLIDO", surname(&director));
    put("PERSONA_CONTACTO", director);
    put("EMAIL_ENVIO_FACTURA", email.clone());
    put("EMAIL_PERSONA_CONTACTO", email);
    put("TELEFONO_1", phone);
    put("TEXTOS_INFORMATIVOS", info_text(financial, business));
    put("CERTIFICADOS", certifications);
    put("CREDITO_SOLICITADO_EUROS", credit_limit.clone());
    put("LIMITE_CREDITO", credit_limit);
    put(
        "FORMA_PAGO",
        text_at(creditworthiness, &["payment_behavior", "payment_method"]),
    );
    put("OBSERVACIONES_FINANCIERAS", financial_notes(creditworthiness));

    record
}

/// Mapper with no remote dependency
#[derive(Debug, Default, Clone)]
pub struct BasicMapper;

#[async_trait]
impl FieldMapper for BasicMapper {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn map_raw(&self, raw: &RawExtraction) -> Result<CanonicalRecord, ExtractionError> {
        let record = map_value(&raw.0);
        debug!(fields = record.field_count(), "Basic mapping complete");
        Ok(record)
    }
}

fn section<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&NULL)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(format_number(n)),
        _ => None,
    }
}

/// Text at a nested key path, empty string when missing or not scalar
fn text_at(value: &Value, path: &[&str]) -> String {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .and_then(scalar_text)
        .unwrap_or_default()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

trait OrIfEmpty {
    fn or_if_empty(self, fallback: impl FnOnce() -> String) -> String;
}

impl OrIfEmpty for String {
    fn or_if_empty(self, fallback: impl FnOnce() -> String) -> String {
        if self.is_empty() {
            fallback()
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_street() {
        assert_eq!(
            split_street("Stadtring Nordhorn 111"),
            ("Stadtring Nordhorn".to_string(), "111".to_string())
        );
        assert_eq!(
            split_street("Hauptstr. 12a"),
            ("Hauptstr.".to_string(), "12a".to_string())
        );
        assert_eq!(
            split_street("Am Markt"),
            ("Am Markt".to_string(), String::new())
        );
    }

    #[test]
    fn test_normalize_credit_limit() {
        assert_eq!(normalize_credit_limit(&json!("650.000,00")), "650000.00");
        assert_eq!(normalize_credit_limit(&json!("650.000,00 EUR")), "650000.00");
        assert_eq!(normalize_credit_limit(&json!(650000)), "650000");
        assert_eq!(normalize_credit_limit(&json!(650000.0)), "650000");
        assert_eq!(normalize_credit_limit(&json!(null)), "");
    }

    #[test]
    fn test_surname_and_language() {
        assert_eq!(surname("Hans Peter Müller"), "Müller");
        assert_eq!(surname(""), "");
        assert_eq!(infer_language("Deutschland"), "DE");
        assert_eq!(infer_language("GERMANY"), "DE");
        assert_eq!(infer_language("Francia"), "FR");
        assert_eq!(infer_language("España"), "ES");
        assert_eq!(infer_language(""), "ES");
    }

    #[test]
    fn test_search_concept() {
        assert_eq!(search_concept("Acme-Werk GmbH"), "ACME WERK ");
        assert_eq!(search_concept("Ab"), "AB");
    }

    #[test]
    fn test_legacy_address_string() {
        let parts = parse_address(&json!("Stadtring Nordhorn 111, 33334 Gütersloh, Deutschland"));
        assert_eq!(parts.street, "Stadtring Nordhorn");
        assert_eq!(parts.number, "111");
        assert_eq!(parts.postal_code, "33334");
        assert_eq!(parts.city, "Gütersloh");
        assert_eq!(parts.country, "Deutschland");

        assert_eq!(parse_address(&json!("just a street")), AddressParts::default());
    }

    #[test]
    fn test_map_business_report() {
        let raw = json!({
            "status_code": 200,
            "response": {
                "company_identification": {
                    "name": "Acme Stahl GmbH",
                    "address": {
                        "street": "Stadtring Nordhorn 111",
                        "zip_code": "33334",
                        "city": "Gütersloh",
                        "country": "Deutschland"
                    },
                    "registration_details": { "vat_id": "DE811234567", "legal_form": "GmbH" },
                    "contact": { "email": "info@acme.de", "phone": "+49 5241 0" }
                },
                "management_and_representation": {
                    "managing_directors": [{ "name": "Hans Müller" }, { "name": "Other" }]
                },
                "creditworthiness": {
                    "credit_limit_eur": "650.000,00",
                    "payment_behavior": { "payment_method": "Lastschrift" },
                    "bonitaetsindex2_0": { "value": 215 },
                    "pd_probability_of_default": { "value": "0,45%", "description": "low risk" }
                },
                "business_activity": {
                    "registered_business_purpose": "Manufacture of steel products",
                    "certifications": ["IATF 16949", "ISO 9001"]
                },
                "financial_figures": {
                    "employees_and_revenue": { "employees": { "2022": 110, "2023": 120 } }
                }
            }
        });

        let record = map_value(&raw);
        assert_eq!(record.text("NOMBRE"), Some("Acme Stahl GmbH"));
        assert_eq!(record.text("CIF"), Some("DE811234567"));
        assert_eq!(record.text("CALLE"), Some("Stadtring Nordhorn"));
        assert_eq!(record.text("NUMERO"), Some("111"));
        assert_eq!(record.text("COD_POSTAL"), Some("33334"));
        assert_eq!(record.text("IDIOMA"), Some("DE"));
        assert_eq!(record.text("TIPO_CLIENTE"), Some("GmbH"));
        assert_eq!(record.text("PERSONA_CONTACTO"), Some("Hans Müller"));
        assert_eq!(record.text("APELLIDO"), Some("Müller"));
        assert_eq!(record.text("EMAIL_ENVIO_FACTURA"), Some("info@acme.de"));
        assert_eq!(record.text("CREDITO_SOLICITADO_EUROS"), Some("650000.00"));
        assert_eq!(record.text("CERTIFICADOS"), Some("IATF 16949, ISO 9001"));
        assert_eq!(record.text("CONCEPTO_BUSQUEDA"), Some("ACME STAHL"));
        assert_eq!(record.text("FORMA_PAGO"), Some("Lastschrift"));
        assert_eq!(
            record.text("TEXTOS_INFORMATIVOS"),
            Some("Employees: 120. Manufacture of steel products")
        );
        assert_eq!(
            record.text("OBSERVACIONES_FINANCIERAS"),
            Some("Bonitätsindex: 215. PD: 0,45%. low risk")
        );
    }

    #[test]
    fn test_map_unwraps_envelopes_and_defaults_country() {
        let inner = json!({"company_identification": {"company_name": "Beta AG"}});
        let raw = json!({"result": inner.to_string()});

        let record = map_value(&raw);
        assert_eq!(record.text("NOMBRE"), Some("Beta AG"));
        assert_eq!(record.text("PAIS"), Some("Deutschland"));
        assert_eq!(record.text("IDIOMA"), Some("DE"));
        assert!(record.get("CALLE").is_none());
        assert!(record.get("TEXTOS_INFORMATIVOS").is_none());
    }

    #[test]
    fn test_map_garbage_is_near_empty() {
        let record = map_value(&json!("not json at all"));
        assert_eq!(record.text("PAIS"), Some("Deutschland"));
        assert!(record.get("NOMBRE").is_none());
    }

    #[tokio::test]
    async fn test_mapper_trait_never_fails() {
        let mapper = BasicMapper;
        let record = mapper.map_raw(&RawExtraction(json!(null))).await.unwrap();
        assert_eq!(mapper.name(), "basic");
        assert_eq!(record.text("PAIS"), Some("Deutschland"));
    }
}
