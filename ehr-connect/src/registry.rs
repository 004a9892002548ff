//! Static registry of the resource keys the front-end can request.
//!
//! Every [`ResourceKey`] knows which identifier it needs, how to query the
//! FHIR API for it, how to label it, and whether its payload goes through the
//! AI summarization pipeline. Strings only appear at the edge (`FromStr`).

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EhrError, Result};

const LOINC: &str = "http://loinc.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierRequirement {
    None,
    Patient,
    Worker,
}

impl fmt::Display for IdentifierRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentifierRequirement::None => "no",
            IdentifierRequirement::Patient => "patient",
            IdentifierRequirement::Worker => "worker",
        };
        f.write_str(name)
    }
}

/// Identifiers supplied with a fetch request.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentifiers {
    pub patient_id: Option<String>,
    pub worker_id: Option<String>,
}

impl RequestIdentifiers {
    pub fn new(patient_id: Option<&str>, worker_id: Option<&str>) -> Self {
        let clean = |id: Option<&str>| {
            id.map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        };
        Self {
            patient_id: clean(patient_id),
            worker_id: clean(worker_id),
        }
    }

    pub fn patient(patient_id: &str) -> Self {
        Self::new(Some(patient_id), None)
    }
}

/// Concrete FHIR interaction for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceQuery {
    Read {
        resource_type: &'static str,
        id: String,
    },
    Search {
        resource_type: &'static str,
        params: Vec<(String, String)>,
    },
}

impl ResourceQuery {
    pub fn path(&self) -> String {
        match self {
            ResourceQuery::Read { resource_type, id } => {
                format!("{}/{}", resource_type, urlencoding::encode(id))
            }
            ResourceQuery::Search { resource_type, .. } => resource_type.to_string(),
        }
    }

    pub fn params(&self) -> &[(String, String)] {
        match self {
            ResourceQuery::Read { .. } => &[],
            ResourceQuery::Search { params, .. } => params,
        }
    }

    pub fn resource_type(&self) -> &'static str {
        match self {
            ResourceQuery::Read { resource_type, .. } => resource_type,
            ResourceQuery::Search { resource_type, .. } => resource_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Patient,
    AllergyIntolerance,
    Condition,
    MedicationRequest,
    MedicationStatement,
    Immunization,
    Procedure,
    EpisodeOfCare,
    Encounter,
    CareTeam,
    CarePlan,
    AideCarePlan,
    Goal,
    ServiceRequest,
    DiagnosticReport,
    Coverage,
    RelatedPerson,
    Flag,
    QuestionnaireResponse,
    LabResults,
    BloodPressure,
    HeartRate,
    BodyTemperature,
    OxygenSaturation,
    BodyWeight,
    RespiratoryRate,
    BloodGlucose,
    PainSeverity,
    VisitNotes,
    PhysicianOrders,
    DischargeSummary,
    ConsultNotes,
    HistoryAndPhysical,
    PlanOfCare,
    ReferralNotes,
    Worker,
    WorkerSchedule,
    AgencyLocations,
}

impl ResourceKey {
    pub const ALL: [ResourceKey; 38] = [
        ResourceKey::Patient,
        ResourceKey::AllergyIntolerance,
        ResourceKey::Condition,
        ResourceKey::MedicationRequest,
        ResourceKey::MedicationStatement,
        ResourceKey::Immunization,
        ResourceKey::Procedure,
        ResourceKey::EpisodeOfCare,
        ResourceKey::Encounter,
        ResourceKey::CareTeam,
        ResourceKey::CarePlan,
        ResourceKey::AideCarePlan,
        ResourceKey::Goal,
        ResourceKey::ServiceRequest,
        ResourceKey::DiagnosticReport,
        ResourceKey::Coverage,
        ResourceKey::RelatedPerson,
        ResourceKey::Flag,
        ResourceKey::QuestionnaireResponse,
        ResourceKey::LabResults,
        ResourceKey::BloodPressure,
        ResourceKey::HeartRate,
        ResourceKey::BodyTemperature,
        ResourceKey::OxygenSaturation,
        ResourceKey::BodyWeight,
        ResourceKey::RespiratoryRate,
        ResourceKey::BloodGlucose,
        ResourceKey::PainSeverity,
        ResourceKey::VisitNotes,
        ResourceKey::PhysicianOrders,
        ResourceKey::DischargeSummary,
        ResourceKey::ConsultNotes,
        ResourceKey::HistoryAndPhysical,
        ResourceKey::PlanOfCare,
        ResourceKey::ReferralNotes,
        ResourceKey::Worker,
        ResourceKey::WorkerSchedule,
        ResourceKey::AgencyLocations,
    ];

    pub const DOCUMENT_KEYS: [ResourceKey; 7] = [
        ResourceKey::VisitNotes,
        ResourceKey::PhysicianOrders,
        ResourceKey::DischargeSummary,
        ResourceKey::ConsultNotes,
        ResourceKey::HistoryAndPhysical,
        ResourceKey::PlanOfCare,
        ResourceKey::ReferralNotes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKey::Patient => "Patient",
            ResourceKey::AllergyIntolerance => "AllergyIntolerance",
            ResourceKey::Condition => "Condition",
            ResourceKey::MedicationRequest => "MedicationRequest",
            ResourceKey::MedicationStatement => "MedicationStatement",
            ResourceKey::Immunization => "Immunization",
            ResourceKey::Procedure => "Procedure",
            ResourceKey::EpisodeOfCare => "EpisodeOfCare",
            ResourceKey::Encounter => "Encounter",
            ResourceKey::CareTeam => "CareTeam",
            ResourceKey::CarePlan => "CarePlan",
            ResourceKey::AideCarePlan => "AideCarePlan",
            ResourceKey::Goal => "Goal",
            ResourceKey::ServiceRequest => "ServiceRequest",
            ResourceKey::DiagnosticReport => "DiagnosticReport",
            ResourceKey::Coverage => "Coverage",
            ResourceKey::RelatedPerson => "RelatedPerson",
            ResourceKey::Flag => "Flag",
            ResourceKey::QuestionnaireResponse => "QuestionnaireResponse",
            ResourceKey::LabResults => "LabResults",
            ResourceKey::BloodPressure => "BloodPressure",
            ResourceKey::HeartRate => "HeartRate",
            ResourceKey::BodyTemperature => "BodyTemperature",
            ResourceKey::OxygenSaturation => "OxygenSaturation",
            ResourceKey::BodyWeight => "BodyWeight",
            ResourceKey::RespiratoryRate => "RespiratoryRate",
            ResourceKey::BloodGlucose => "BloodGlucose",
            ResourceKey::PainSeverity => "PainSeverity",
            ResourceKey::VisitNotes => "VisitNotes",
            ResourceKey::PhysicianOrders => "PhysicianOrders",
            ResourceKey::DischargeSummary => "DischargeSummary",
            ResourceKey::ConsultNotes => "ConsultNotes",
            ResourceKey::HistoryAndPhysical => "HistoryAndPhysical",
            ResourceKey::PlanOfCare => "PlanOfCare",
            ResourceKey::ReferralNotes => "ReferralNotes",
            ResourceKey::Worker => "Worker",
            ResourceKey::WorkerSchedule => "WorkerSchedule",
            ResourceKey::AgencyLocations => "AgencyLocations",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKey::Patient => "Patient Demographics",
            ResourceKey::AllergyIntolerance => "Allergies",
            ResourceKey::Condition => "Active Conditions",
            ResourceKey::MedicationRequest => "Medication Orders",
            ResourceKey::MedicationStatement => "Medication List",
            ResourceKey::Immunization => "Immunizations",
            ResourceKey::Procedure => "Procedures",
            ResourceKey::EpisodeOfCare => "Episodes of Care",
            ResourceKey::Encounter => "Recent Visits",
            ResourceKey::CareTeam => "Care Team",
            ResourceKey::CarePlan => "Care Plans",
            ResourceKey::AideCarePlan => "Aide Home Care Plan",
            ResourceKey::Goal => "Goals",
            ResourceKey::ServiceRequest => "Orders and Referrals",
            ResourceKey::DiagnosticReport => "Diagnostic Reports",
            ResourceKey::Coverage => "Insurance Coverage",
            ResourceKey::RelatedPerson => "Contacts",
            ResourceKey::Flag => "Alerts",
            ResourceKey::QuestionnaireResponse => "Assessments",
            ResourceKey::LabResults => "Lab Results",
            ResourceKey::BloodPressure => "Blood Pressure",
            ResourceKey::HeartRate => "Heart Rate",
            ResourceKey::BodyTemperature => "Temperature",
            ResourceKey::OxygenSaturation => "Oxygen Saturation",
            ResourceKey::BodyWeight => "Body Weight",
            ResourceKey::RespiratoryRate => "Respiratory Rate",
            ResourceKey::BloodGlucose => "Blood Glucose",
            ResourceKey::PainSeverity => "Pain Score",
            ResourceKey::VisitNotes => "Visit Notes",
            ResourceKey::PhysicianOrders => "Physician Orders",
            ResourceKey::DischargeSummary => "Discharge Summaries",
            ResourceKey::ConsultNotes => "Consult Notes",
            ResourceKey::HistoryAndPhysical => "History and Physical",
            ResourceKey::PlanOfCare => "Plan of Care",
            ResourceKey::ReferralNotes => "Referral Notes",
            ResourceKey::Worker => "Worker Profile",
            ResourceKey::WorkerSchedule => "Today's Schedule",
            ResourceKey::AgencyLocations => "Agency Locations",
        }
    }

    pub fn identifier(self) -> IdentifierRequirement {
        match self {
            ResourceKey::Worker | ResourceKey::WorkerSchedule => IdentifierRequirement::Worker,
            ResourceKey::AgencyLocations => IdentifierRequirement::None,
            _ => IdentifierRequirement::Patient,
        }
    }

    /// Narrative, document and clinical-judgment payloads are summarized by
    /// the model; everything else is formatted deterministically.
    pub fn needs_ai_summary(self) -> bool {
        self.is_document()
            || matches!(
                self,
                ResourceKey::CarePlan
                    | ResourceKey::AideCarePlan
                    | ResourceKey::Goal
                    | ResourceKey::DiagnosticReport
                    | ResourceKey::QuestionnaireResponse
            )
    }

    pub fn is_document(self) -> bool {
        Self::DOCUMENT_KEYS.contains(&self)
    }

    fn vital_code(self) -> Option<&'static str> {
        match self {
            ResourceKey::BloodPressure => Some("85354-9"),
            ResourceKey::HeartRate => Some("8867-4"),
            ResourceKey::BodyTemperature => Some("8310-5"),
            ResourceKey::OxygenSaturation => Some("2708-6"),
            ResourceKey::BodyWeight => Some("29463-7"),
            ResourceKey::RespiratoryRate => Some("9279-1"),
            ResourceKey::BloodGlucose => Some("2339-0"),
            ResourceKey::PainSeverity => Some("72514-3"),
            _ => None,
        }
    }

    fn document_code(self) -> Option<&'static str> {
        match self {
            ResourceKey::VisitNotes => Some("11506-3"),
            ResourceKey::PhysicianOrders => Some("46209-3"),
            ResourceKey::DischargeSummary => Some("18842-5"),
            ResourceKey::ConsultNotes => Some("11488-4"),
            ResourceKey::HistoryAndPhysical => Some("34117-2"),
            ResourceKey::PlanOfCare => Some("18776-5"),
            ResourceKey::ReferralNotes => Some("57133-1"),
            _ => None,
        }
    }

    /// Build the FHIR interaction for this key. Fails when the identifier the
    /// key needs was not supplied.
    pub fn query(self, ids: &RequestIdentifiers, today: NaiveDate) -> Result<ResourceQuery> {
        let id = match self.identifier() {
            IdentifierRequirement::Patient => Some(ids.patient_id.as_deref()),
            IdentifierRequirement::Worker => Some(ids.worker_id.as_deref()),
            IdentifierRequirement::None => None,
        };
        let id = match id {
            Some(Some(id)) => id,
            Some(None) => {
                return Err(EhrError::MissingIdentifier {
                    key: self.as_str().to_string(),
                    identifier: self.identifier().to_string(),
                });
            }
            None => "",
        };

        let subject = format!("Patient/{}", id);
        let p = |name: &str, value: &str| (name.to_string(), value.to_string());
        let search = |resource_type: &'static str, params: Vec<(String, String)>| {
            ResourceQuery::Search {
                resource_type,
                params,
            }
        };

        if let Some(code) = self.vital_code() {
            let since = today.checked_sub_days(Days::new(30)).unwrap_or(today);
            return Ok(search(
                "Observation",
                vec![
                    p("subject", &subject),
                    p("code", &format!("{}|{}", LOINC, code)),
                    p("date", &format!("ge{}", since)),
                    p("_sort", "-date"),
                    p("_count", "10"),
                ],
            ));
        }

        if let Some(code) = self.document_code() {
            return Ok(search(
                "DocumentReference",
                vec![
                    p("subject", &subject),
                    p("type", &format!("{}|{}", LOINC, code)),
                    p("status", "current"),
                    p("_sort", "-date"),
                    p("_count", "10"),
                ],
            ));
        }

        let query = match self {
            ResourceKey::Patient => ResourceQuery::Read {
                resource_type: "Patient",
                id: id.to_string(),
            },
            ResourceKey::Worker => ResourceQuery::Read {
                resource_type: "Practitioner",
                id: id.to_string(),
            },
            ResourceKey::AllergyIntolerance => {
                search("AllergyIntolerance", vec![p("patient", &subject)])
            }
            ResourceKey::Condition => search(
                "Condition",
                vec![p("subject", &subject), p("clinical-status", "active")],
            ),
            ResourceKey::MedicationRequest => search(
                "MedicationRequest",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::MedicationStatement => search(
                "MedicationStatement",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::Immunization => search(
                "Immunization",
                vec![p("patient", &subject), p("_sort", "-date")],
            ),
            ResourceKey::Procedure => search(
                "Procedure",
                vec![p("subject", &subject), p("_sort", "-date"), p("_count", "20")],
            ),
            ResourceKey::EpisodeOfCare => search(
                "EpisodeOfCare",
                vec![p("patient", &subject), p("status", "active")],
            ),
            ResourceKey::Encounter => search(
                "Encounter",
                vec![p("subject", &subject), p("_sort", "-date"), p("_count", "10")],
            ),
            ResourceKey::CareTeam => search(
                "CareTeam",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::CarePlan => search(
                "CarePlan",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::AideCarePlan => search(
                "CarePlan",
                vec![
                    p("subject", &subject),
                    p("status", "active"),
                    p("category", "aide-homecare"),
                ],
            ),
            ResourceKey::Goal => search(
                "Goal",
                vec![p("subject", &subject), p("lifecycle-status", "active")],
            ),
            ResourceKey::ServiceRequest => search(
                "ServiceRequest",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::DiagnosticReport => search(
                "DiagnosticReport",
                vec![p("subject", &subject), p("_sort", "-date"), p("_count", "10")],
            ),
            ResourceKey::Coverage => search(
                "Coverage",
                vec![p("beneficiary", &subject), p("status", "active")],
            ),
            ResourceKey::RelatedPerson => search("RelatedPerson", vec![p("patient", &subject)]),
            ResourceKey::Flag => search(
                "Flag",
                vec![p("subject", &subject), p("status", "active")],
            ),
            ResourceKey::QuestionnaireResponse => search(
                "QuestionnaireResponse",
                vec![p("subject", &subject), p("_sort", "-authored"), p("_count", "5")],
            ),
            ResourceKey::LabResults => search(
                "Observation",
                vec![
                    p("subject", &subject),
                    p("category", "laboratory"),
                    p("_sort", "-date"),
                    p("_count", "20"),
                ],
            ),
            ResourceKey::WorkerSchedule => {
                let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
                search(
                    "Appointment",
                    vec![
                        p("practitioner", &format!("Practitioner/{}", id)),
                        p("date", &format!("ge{}", today)),
                        p("date", &format!("lt{}", tomorrow)),
                        p("_sort", "date"),
                    ],
                )
            }
            ResourceKey::AgencyLocations => search(
                "Location",
                vec![p("status", "active"), p("_count", "50")],
            ),
            other => {
                // Vital and document keys returned above.
                return Err(EhrError::UnsupportedResourceType(other.as_str().to_string()));
            }
        };

        Ok(query)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKey {
    type Err = EhrError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ResourceKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| EhrError::UnsupportedResourceType(wanted.to_string()))
    }
}
