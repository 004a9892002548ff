//! Deterministic projection of retrieved payloads into display lines.
//!
//! [`ResourcePayload`] is the typed view of one [`ResourceResult`]. Shapes the
//! projection does not recognise fall through to `Unknown` with the raw JSON
//! preserved, so nothing a caller fetched is lost.

use serde::Serialize;
use serde_json::Value;

use crate::documents::{DocumentDescriptor, documents_from_bundle};
use crate::fhir::{
    bundle_resources, codeable_text, concept_text, human_name, quantity_text, resource_type,
    scalar_text, telecom, text_at,
};
use crate::orchestrator::ResourceResult;
use crate::registry::ResourceKey;

const SYSTOLIC: &str = "8480-6";
const DIASTOLIC: &str = "8462-4";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientSummary {
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub mrn: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PractitionerSummary {
    pub name: Option<String>,
    pub qualification: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Allergy {
    pub substance: String,
    pub reaction: Option<String>,
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConditionItem {
    pub display: String,
    pub clinical_status: Option<String>,
    pub onset: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Medication {
    pub name: String,
    pub dosage: Option<String>,
    pub status: Option<String>,
}

/// One Observation: a vital sign or a lab value.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Visit {
    pub kind: String,
    pub date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CareTeamMember {
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Appointment {
    pub start: Option<String>,
    pub description: String,
    pub patient: Option<String>,
    pub status: Option<String>,
}

/// Fallback row for resource types without a dedicated projection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Entry {
    pub resource_type: String,
    pub text: String,
    pub status: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePayload {
    Patient(PatientSummary),
    Practitioner(PractitionerSummary),
    Allergies(Vec<Allergy>),
    Conditions(Vec<ConditionItem>),
    Medications(Vec<Medication>),
    Vitals(Vec<Reading>),
    Encounters(Vec<Visit>),
    CareTeam(Vec<CareTeamMember>),
    Appointments(Vec<Appointment>),
    Documents(Vec<DocumentDescriptor>),
    Entries(Vec<Entry>),
    Empty,
    Unknown(Value),
}

impl ResourcePayload {
    pub fn from_result(result: &ResourceResult) -> Self {
        let data = match &result.data {
            None | Some(Value::Null) => return ResourcePayload::Empty,
            Some(data) => data,
        };
        match result.key() {
            Some(key) => Self::project(key, data),
            None => ResourcePayload::Unknown(data.clone()),
        }
    }

    pub fn project(key: ResourceKey, data: &Value) -> Self {
        if resource_type(data).is_none() {
            return ResourcePayload::Unknown(data.clone());
        }
        let resources = bundle_resources(data);
        if resources.is_empty() {
            return ResourcePayload::Empty;
        }

        match key {
            ResourceKey::Patient => match resources[0] {
                r if resource_type(r) == Some("Patient") => ResourcePayload::Patient(patient(r)),
                _ => ResourcePayload::Unknown(data.clone()),
            },
            ResourceKey::Worker => match resources[0] {
                r if resource_type(r) == Some("Practitioner") => {
                    ResourcePayload::Practitioner(practitioner(r))
                }
                _ => ResourcePayload::Unknown(data.clone()),
            },
            ResourceKey::AllergyIntolerance => {
                ResourcePayload::Allergies(resources.into_iter().map(allergy).collect())
            }
            ResourceKey::Condition => {
                ResourcePayload::Conditions(resources.into_iter().map(condition).collect())
            }
            ResourceKey::MedicationRequest | ResourceKey::MedicationStatement => {
                ResourcePayload::Medications(resources.into_iter().map(medication).collect())
            }
            ResourceKey::BloodPressure
            | ResourceKey::HeartRate
            | ResourceKey::BodyTemperature
            | ResourceKey::OxygenSaturation
            | ResourceKey::BodyWeight
            | ResourceKey::RespiratoryRate
            | ResourceKey::BloodGlucose
            | ResourceKey::PainSeverity
            | ResourceKey::LabResults => {
                ResourcePayload::Vitals(resources.into_iter().map(reading).collect())
            }
            ResourceKey::Encounter => {
                ResourcePayload::Encounters(resources.into_iter().map(visit).collect())
            }
            ResourceKey::CareTeam => ResourcePayload::CareTeam(
                resources.into_iter().flat_map(care_team_members).collect(),
            ),
            ResourceKey::WorkerSchedule => {
                ResourcePayload::Appointments(resources.into_iter().map(appointment).collect())
            }
            ResourceKey::VisitNotes
            | ResourceKey::PhysicianOrders
            | ResourceKey::DischargeSummary
            | ResourceKey::ConsultNotes
            | ResourceKey::HistoryAndPhysical
            | ResourceKey::PlanOfCare
            | ResourceKey::ReferralNotes => ResourcePayload::Documents(documents_from_bundle(data)),
            ResourceKey::Immunization
            | ResourceKey::Procedure
            | ResourceKey::EpisodeOfCare
            | ResourceKey::CarePlan
            | ResourceKey::AideCarePlan
            | ResourceKey::Goal
            | ResourceKey::ServiceRequest
            | ResourceKey::DiagnosticReport
            | ResourceKey::Coverage
            | ResourceKey::RelatedPerson
            | ResourceKey::Flag
            | ResourceKey::QuestionnaireResponse
            | ResourceKey::AgencyLocations => {
                ResourcePayload::Entries(resources.into_iter().map(entry).collect())
            }
        }
    }

    pub fn render(&self) -> Vec<String> {
        match self {
            ResourcePayload::Patient(p) => {
                let mut lines = vec![p.name.clone().unwrap_or_else(|| "Unnamed patient".into())];
                if let Some(dob) = &p.birth_date {
                    lines.push(format!("DOB: {}", dob));
                }
                if let Some(gender) = &p.gender {
                    lines.push(format!("Gender: {}", gender));
                }
                if let Some(mrn) = &p.mrn {
                    lines.push(format!("MRN: {}", mrn));
                }
                if let Some(phone) = &p.phone {
                    lines.push(format!("Phone: {}", phone));
                }
                lines
            }
            ResourcePayload::Practitioner(p) => {
                let name = p.name.clone().unwrap_or_else(|| "Unnamed worker".into());
                let mut line = match &p.qualification {
                    Some(q) => format!("{} ({})", name, q),
                    None => name,
                };
                if p.active == Some(false) {
                    line.push_str(" [inactive]");
                }
                vec![line]
            }
            ResourcePayload::Allergies(items) => items
                .iter()
                .map(|a| {
                    let mut line = a.substance.clone();
                    if let Some(reaction) = &a.reaction {
                        line.push_str(&format!(": {}", reaction));
                    }
                    if let Some(severity) = &a.severity {
                        line.push_str(&format!(" ({})", severity));
                    }
                    line
                })
                .collect(),
            ResourcePayload::Conditions(items) => items
                .iter()
                .map(|c| {
                    with_suffixes(&c.display, &[c.clinical_status.as_deref(), c.onset.as_deref()])
                })
                .collect(),
            ResourcePayload::Medications(items) => items
                .iter()
                .map(|m| match &m.dosage {
                    Some(dosage) => format!("{} - {}", m.name, dosage),
                    None => m.name.clone(),
                })
                .collect(),
            ResourcePayload::Vitals(items) => items
                .iter()
                .map(|r| {
                    let value = r.value.as_deref().unwrap_or("no value");
                    match &r.date {
                        Some(date) => format!("{}: {} ({})", r.name, value, date),
                        None => format!("{}: {}", r.name, value),
                    }
                })
                .collect(),
            ResourcePayload::Encounters(items) => items
                .iter()
                .map(|v| with_suffixes(&v.kind, &[v.date.as_deref(), v.status.as_deref()]))
                .collect(),
            ResourcePayload::CareTeam(members) => members
                .iter()
                .map(|m| match &m.role {
                    Some(role) => format!("{} - {}", m.name, role),
                    None => m.name.clone(),
                })
                .collect(),
            ResourcePayload::Appointments(items) => items
                .iter()
                .map(|a| {
                    let mut line = match &a.start {
                        Some(start) => format!("{} {}", start, a.description),
                        None => a.description.clone(),
                    };
                    if let Some(patient) = &a.patient {
                        line.push_str(&format!(" with {}", patient));
                    }
                    line
                })
                .collect(),
            ResourcePayload::Documents(docs) => docs
                .iter()
                .map(|d| with_suffixes(&d.document_type, &[d.date.as_deref()]))
                .collect(),
            ResourcePayload::Entries(items) => items
                .iter()
                .map(|e| with_suffixes(&e.text, &[e.status.as_deref(), e.date.as_deref()]))
                .collect(),
            ResourcePayload::Empty => vec!["No data available".to_string()],
            ResourcePayload::Unknown(_) => vec!["Unrecognized payload".to_string()],
        }
    }
}

/// Format a result straight to display lines.
pub fn format_result(result: &ResourceResult) -> Vec<String> {
    ResourcePayload::from_result(result).render()
}

fn with_suffixes(head: &str, suffixes: &[Option<&str>]) -> String {
    let present: Vec<&str> = suffixes.iter().flatten().copied().collect();
    if present.is_empty() {
        head.to_string()
    } else {
        format!("{} ({})", head, present.join(", "))
    }
}

fn patient(resource: &Value) -> PatientSummary {
    PatientSummary {
        name: human_name(resource),
        birth_date: text_at(resource, "/birthDate"),
        gender: text_at(resource, "/gender"),
        mrn: text_at(resource, "/identifier/0/value"),
        phone: telecom(resource, "phone"),
    }
}

fn practitioner(resource: &Value) -> PractitionerSummary {
    PractitionerSummary {
        name: human_name(resource),
        qualification: resource
            .pointer("/qualification/0/code")
            .and_then(codeable_text),
        active: resource.get("active").and_then(Value::as_bool),
    }
}

fn allergy(resource: &Value) -> Allergy {
    Allergy {
        substance: concept_text(resource, "code").unwrap_or_else(|| "Unknown substance".into()),
        reaction: resource
            .pointer("/reaction/0/manifestation/0")
            .and_then(codeable_text),
        severity: text_at(resource, "/reaction/0/severity")
            .or_else(|| text_at(resource, "/criticality")),
    }
}

fn condition(resource: &Value) -> ConditionItem {
    ConditionItem {
        display: concept_text(resource, "code").unwrap_or_else(|| "Unspecified condition".into()),
        clinical_status: concept_text(resource, "clinicalStatus"),
        onset: text_at(resource, "/onsetDateTime"),
    }
}

fn medication(resource: &Value) -> Medication {
    Medication {
        name: concept_text(resource, "medicationCodeableConcept")
            .or_else(|| text_at(resource, "/medicationReference/display"))
            .unwrap_or_else(|| "Unnamed medication".into()),
        dosage: text_at(resource, "/dosageInstruction/0/text")
            .or_else(|| text_at(resource, "/dosage/0/text")),
        status: text_at(resource, "/status"),
    }
}

fn reading(resource: &Value) -> Reading {
    let value = blood_pressure(resource)
        .or_else(|| resource.get("valueQuantity").and_then(quantity_text))
        .or_else(|| concept_text(resource, "valueCodeableConcept"))
        .or_else(|| text_at(resource, "/valueString"))
        .or_else(|| resource.get("valueInteger").and_then(scalar_text));

    Reading {
        name: concept_text(resource, "code").unwrap_or_else(|| "Observation".into()),
        value,
        date: text_at(resource, "/effectiveDateTime").or_else(|| text_at(resource, "/issued")),
    }
}

/// `systolic/diastolic unit` from the panel components.
fn blood_pressure(resource: &Value) -> Option<String> {
    let components = resource.get("component")?.as_array()?;
    let component = |code: &str| {
        components.iter().find(|c| {
            c.pointer("/code/coding")
                .and_then(Value::as_array)
                .is_some_and(|codings| {
                    codings
                        .iter()
                        .any(|coding| coding.get("code").and_then(Value::as_str) == Some(code))
                })
        })
    };

    let systolic = component(SYSTOLIC)?.pointer("/valueQuantity")?;
    let diastolic = component(DIASTOLIC)?.pointer("/valueQuantity")?;
    let unit = text_at(systolic, "/unit").unwrap_or_else(|| "mmHg".into());
    Some(format!(
        "{}/{} {}",
        systolic.get("value").and_then(scalar_text)?,
        diastolic.get("value").and_then(scalar_text)?,
        unit
    ))
}

fn visit(resource: &Value) -> Visit {
    Visit {
        kind: concept_text(resource, "type")
            .or_else(|| text_at(resource, "/class/display"))
            .unwrap_or_else(|| "Visit".into()),
        date: text_at(resource, "/period/start"),
        status: text_at(resource, "/status"),
    }
}

fn care_team_members(resource: &Value) -> Vec<CareTeamMember> {
    resource
        .get("participant")
        .and_then(Value::as_array)
        .map(|participants| {
            participants
                .iter()
                .filter_map(|p| {
                    Some(CareTeamMember {
                        name: text_at(p, "/member/display")?,
                        role: concept_text(p, "role"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn appointment(resource: &Value) -> Appointment {
    let patient = resource
        .get("participant")
        .and_then(Value::as_array)
        .and_then(|participants| {
            participants.iter().find(|p| {
                p.pointer("/actor/reference")
                    .and_then(Value::as_str)
                    .is_some_and(|r| r.starts_with("Patient/"))
            })
        })
        .and_then(|p| text_at(p, "/actor/display"));

    Appointment {
        start: text_at(resource, "/start"),
        description: text_at(resource, "/description")
            .or_else(|| concept_text(resource, "serviceType"))
            .unwrap_or_else(|| "Visit".into()),
        patient,
        status: text_at(resource, "/status"),
    }
}

fn entry(resource: &Value) -> Entry {
    let text = concept_text(resource, "code")
        .or_else(|| concept_text(resource, "vaccineCode"))
        .or_else(|| text_at(resource, "/title"))
        .or_else(|| text_at(resource, "/description/text"))
        .or_else(|| text_at(resource, "/description"))
        .or_else(|| human_name(resource))
        .or_else(|| text_at(resource, "/name"))
        .or_else(|| concept_text(resource, "type"))
        .or_else(|| concept_text(resource, "category"))
        .unwrap_or_else(|| "Untitled".into());

    Entry {
        resource_type: resource_type(resource).unwrap_or("Resource").to_string(),
        text,
        status: text_at(resource, "/status")
            .or_else(|| concept_text(resource, "lifecycleStatus"))
            .or_else(|| text_at(resource, "/lifecycleStatus")),
        date: text_at(resource, "/occurrenceDateTime")
            .or_else(|| text_at(resource, "/performedDateTime"))
            .or_else(|| text_at(resource, "/effectiveDateTime"))
            .or_else(|| text_at(resource, "/authored"))
            .or_else(|| text_at(resource, "/period/start")),
    }
}
