//! Schema registry
//!
//! Single source of truth for the two report kinds and the Grist columns their
//! form fields land in. Each kind owns one ordered field table; nothing else in
//! the workspace spells out a column name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Column holding the processed flag, emitted on every mapped record
pub const PROCESSED_COLUMN: &str = "Traite";

/// Frontend key that may carry an already-set processed flag
pub const PROCESSED_KEY: &str = "traite";

/// Report kinds accepted by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordKind {
    /// Compte rendu d'intervention
    Crca,
    /// Compte rendu de fin de mission
    Crfm,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Crca, RecordKind::Crfm];

    /// Canonical code, also the default Grist table name
    pub fn code(self) -> &'static str {
        match self {
            RecordKind::Crca => "CRCA",
            RecordKind::Crfm => "CRFM",
        }
    }

    /// Draft slot key (`crca_brouillon`, `crfm_brouillon`)
    pub fn draft_key(self) -> String {
        format!("{}_brouillon", self.code().to_lowercase())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRCA" => Ok(RecordKind::Crca),
            "CRFM" => Ok(RecordKind::Crfm),
            _ => Err(Error::UnknownRecordKind(s.to_string())),
        }
    }
}

/// How a form value is coerced into a column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    /// Lists are joined with ", ", scalars pass through as text
    JoinedStringArray,
}

/// One (frontend key, column, value kind) triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub column: &'static str,
    pub kind: ValueKind,
    /// Accepted vocabulary; empty means free text
    pub choices: &'static [&'static str],
}

impl FieldSpec {
    const fn new(key: &'static str, column: &'static str, kind: ValueKind) -> Self {
        Self {
            key,
            column,
            kind,
            choices: &[],
        }
    }

    const fn text(key: &'static str, column: &'static str) -> Self {
        Self::new(key, column, ValueKind::String)
    }

    const fn number(key: &'static str, column: &'static str) -> Self {
        Self::new(key, column, ValueKind::Number)
    }

    const fn one_of(self, choices: &'static [&'static str]) -> Self {
        Self { choices, ..self }
    }
}

/// Ordered field table of one record kind
pub type FieldMapping = &'static [FieldSpec];

pub const SECTEURS: &[&str] = &["ALPHA", "BRAVO", "CHARLIE", "DELTA"];
pub const HORAIRES: &[&str] = &["6-14", "14-22", "22-6"];
pub const MISSIONS: &[&str] = &["CTRZ", "OAD", "MO/RO", "SECURISATION", "RI"];
pub const INTERVENTIONS: &[&str] = &["INITIATIVE", "CIC"];
pub const PAMS: &[&str] = &["PAM_RAS", "PAM_NON_RAS"];

const CRCA_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("secteur", "Secteur").one_of(SECTEURS),
    FieldSpec::new("indicatifs", "Indic_Patrouille", ValueKind::JoinedStringArray),
    FieldSpec::text("intervention", "Intervention").one_of(INTERVENTIONS),
    FieldSpec::text("natureIntervention", "Nature_Intervention"),
    FieldSpec::text("heureDebut", "Heure_debut_Intervention"),
    FieldSpec::text("heureFin", "Heure_Fin_Intervention"),
    FieldSpec::text("lieu", "Lieu"),
    FieldSpec::text("resume", "Resume_Intervention"),
    FieldSpec::text("pam", "PAM").one_of(PAMS),
    FieldSpec::text("personnel", "Personnel"),
    FieldSpec::text("armement", "Armement"),
    FieldSpec::text("materiel", "Materiel"),
];

const CRFM_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("date", "Date"),
    FieldSpec::text("secteur", "Secteur").one_of(SECTEURS),
    FieldSpec::text("mission", "Mission").one_of(MISSIONS),
    FieldSpec::text("horaire", "Horaires").one_of(HORAIRES),
    FieldSpec::number("vlEngages", "VL_Engages"),
    FieldSpec::number("effectifs", "Effectifs"),
    FieldSpec::number("nbOad", "Nbr_OAD"),
    FieldSpec::number("controlesVl", "Nbr_CTRL_VL"),
    FieldSpec::number("controlesPersonne", "Nbr_CTRL_Personne"),
    FieldSpec::number("nbInterCorgCic", "Nbr_Intervention_CORG_CIC"),
    FieldSpec::number("nbInterInitiative", "Nbr_Intervention_Initiative"),
    FieldSpec::number("rensFrm", "FRM"),
    FieldSpec::number("rensFrs", "FRS"),
    FieldSpec::number("stupCannabis", "Cannabis"),
    FieldSpec::number("stupPlant", "Plant_Cannabis"),
    FieldSpec::text("stupAutres", "Precision_STUP"),
    FieldSpec::number("infraTa", "TA"),
    FieldSpec::number("infraDelits", "Delits"),
    FieldSpec::number("interpZgn", "Interpellation_ZGN"),
    FieldSpec::number("interpZpn", "Interpellation_ZPN"),
    FieldSpec::number("caillassageTouchant", "Caillassage_Touchant"),
    FieldSpec::number("caillassageNonTouchant", "Caillassage_Non_Touchant"),
    FieldSpec::number("refusAvecInterp", "Refus_Obtemperer_Avec_Interpellation"),
    FieldSpec::number("refusSansInterp", "Refus_Obtemperer_Sans_Interpellation"),
    FieldSpec::number("obstacle", "Obstacle_Entrave_a_la_circulation_"),
    FieldSpec::number("feuHabitation", "Feu_Habitation_Commerce"),
    FieldSpec::number("feuVoitures", "Feu_Voitures"),
    FieldSpec::number("feuAutres", "Feu_Autres"),
    FieldSpec::number("papafTouchant", "PAPAAF_Touchants"),
    FieldSpec::number("papafNonTouchant", "PAPAAF_Non_Touchants"),
    FieldSpec::number("grenMp7", "MP7"),
    FieldSpec::number("grenCm6", "CM6"),
    FieldSpec::number("grenGenlDmp", "GENL_DMP"),
    FieldSpec::number("grenGm2l", "GM2L"),
    FieldSpec::number("grenGl304", "GL304"),
    FieldSpec::number("munLbd40", "LBD_40"),
    FieldSpec::number("mun9mm", "c9_mm"),
    FieldSpec::number("mun556", "c5_56_mm"),
    FieldSpec::number("mun762", "c7_62_mm"),
    FieldSpec::text("commentairePam", "Commentaire"),
];

/// Field table for a record kind
pub fn fields_for(kind: RecordKind) -> FieldMapping {
    match kind {
        RecordKind::Crca => CRCA_FIELDS,
        RecordKind::Crfm => CRFM_FIELDS,
    }
}

/// Field table for a kind code, failing on codes outside the registry
pub fn fields_for_code(code: &str) -> Result<FieldMapping> {
    code.parse::<RecordKind>().map(fields_for)
}

/// Keys present in `kind`'s table and absent from every other table
///
/// These are the keys that vote for a kind during inference.
pub fn distinguishing_keys(kind: RecordKind) -> impl Iterator<Item = &'static str> {
    fields_for(kind)
        .iter()
        .map(|spec| spec.key)
        .filter(move |key| {
            RecordKind::ALL
                .iter()
                .filter(|other| **other != kind)
                .all(|other| !fields_for(*other).iter().any(|spec| spec.key == *key))
        })
}
