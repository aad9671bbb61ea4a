//! Form records as submitted by the browser
//!
//! A record is validated once at the boundary into a closed union of the two
//! report forms. Every form field is optional and loosely typed: the browser
//! sends counters as numbers or as text, patrol call signs as lists, and leaves
//! untouched inputs null or empty.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{distinguishing_keys, RecordKind};
use crate::{Error, Result};

/// One form value as sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<String>),
    /// Objects and mixed arrays; kept so the record still parses, never mapped
    Other(Value),
}

impl FormValue {
    /// Null, "" and empty lists carry nothing
    pub fn is_blank(&self) -> bool {
        match self {
            FormValue::Text(text) => text.is_empty(),
            FormValue::List(items) => items.iter().all(|item| item.is_empty()),
            FormValue::Other(value) => value.is_null(),
            FormValue::Bool(_) | FormValue::Number(_) => false,
        }
    }

    /// `true`, `"true"`, `1` and `"1"` count as set
    pub fn is_truthy(&self) -> bool {
        match self {
            FormValue::Bool(flag) => *flag,
            FormValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            FormValue::Text(text) => {
                matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1")
            }
            FormValue::List(_) | FormValue::Other(_) => false,
        }
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        FormValue::Text(text.to_string())
    }
}

impl From<i64> for FormValue {
    fn from(n: i64) -> Self {
        FormValue::Number(n.into())
    }
}

/// Intervention report (CRCA)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrcaForm {
    pub secteur: Option<FormValue>,
    pub indicatifs: Option<FormValue>,
    pub intervention: Option<FormValue>,
    pub nature_intervention: Option<FormValue>,
    pub heure_debut: Option<FormValue>,
    pub heure_fin: Option<FormValue>,
    pub lieu: Option<FormValue>,
    pub resume: Option<FormValue>,
    pub pam: Option<FormValue>,
    pub personnel: Option<FormValue>,
    pub armement: Option<FormValue>,
    pub materiel: Option<FormValue>,
    pub traite: Option<FormValue>,
}

impl CrcaForm {
    fn slot(&self, key: &str) -> Option<&Option<FormValue>> {
        let slot = match key {
            "secteur" => &self.secteur,
            "indicatifs" => &self.indicatifs,
            "intervention" => &self.intervention,
            "natureIntervention" => &self.nature_intervention,
            "heureDebut" => &self.heure_debut,
            "heureFin" => &self.heure_fin,
            "lieu" => &self.lieu,
            "resume" => &self.resume,
            "pam" => &self.pam,
            "personnel" => &self.personnel,
            "armement" => &self.armement,
            "materiel" => &self.materiel,
            "traite" => &self.traite,
            _ => return None,
        };
        Some(slot)
    }
}

/// End-of-mission report (CRFM)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrfmForm {
    pub date: Option<FormValue>,
    pub secteur: Option<FormValue>,
    pub mission: Option<FormValue>,
    pub horaire: Option<FormValue>,
    pub effectifs: Option<FormValue>,
    pub vl_engages: Option<FormValue>,
    pub nb_oad: Option<FormValue>,
    pub controles_vl: Option<FormValue>,
    pub controles_personne: Option<FormValue>,
    pub nb_inter_corg_cic: Option<FormValue>,
    pub nb_inter_initiative: Option<FormValue>,
    pub rens_frm: Option<FormValue>,
    pub rens_frs: Option<FormValue>,
    pub stup_cannabis: Option<FormValue>,
    pub stup_plant: Option<FormValue>,
    pub stup_autres: Option<FormValue>,
    pub infra_ta: Option<FormValue>,
    pub infra_delits: Option<FormValue>,
    pub interp_zgn: Option<FormValue>,
    pub interp_zpn: Option<FormValue>,
    pub caillassage_touchant: Option<FormValue>,
    pub caillassage_non_touchant: Option<FormValue>,
    pub refus_avec_interp: Option<FormValue>,
    pub refus_sans_interp: Option<FormValue>,
    pub obstacle: Option<FormValue>,
    pub feu_habitation: Option<FormValue>,
    pub feu_voitures: Option<FormValue>,
    pub feu_autres: Option<FormValue>,
    pub papaf_touchant: Option<FormValue>,
    pub papaf_non_touchant: Option<FormValue>,
    pub gren_mp7: Option<FormValue>,
    pub gren_cm6: Option<FormValue>,
    pub gren_genl_dmp: Option<FormValue>,
    pub gren_gm2l: Option<FormValue>,
    pub gren_gl304: Option<FormValue>,
    pub mun_lbd40: Option<FormValue>,
    pub mun9mm: Option<FormValue>,
    pub mun556: Option<FormValue>,
    pub mun762: Option<FormValue>,
    pub commentaire_pam: Option<FormValue>,
    pub traite: Option<FormValue>,
}

impl CrfmForm {
    fn slot(&self, key: &str) -> Option<&Option<FormValue>> {
        let slot = match key {
            "date" => &self.date,
            "secteur" => &self.secteur,
            "mission" => &self.mission,
            "horaire" => &self.horaire,
            "effectifs" => &self.effectifs,
            "vlEngages" => &self.vl_engages,
            "nbOad" => &self.nb_oad,
            "controlesVl" => &self.controles_vl,
            "controlesPersonne" => &self.controles_personne,
            "nbInterCorgCic" => &self.nb_inter_corg_cic,
            "nbInterInitiative" => &self.nb_inter_initiative,
            "rensFrm" => &self.rens_frm,
            "rensFrs" => &self.rens_frs,
            "stupCannabis" => &self.stup_cannabis,
            "stupPlant" => &self.stup_plant,
            "stupAutres" => &self.stup_autres,
            "infraTa" => &self.infra_ta,
            "infraDelits" => &self.infra_delits,
            "interpZgn" => &self.interp_zgn,
            "interpZpn" => &self.interp_zpn,
            "caillassageTouchant" => &self.caillassage_touchant,
            "caillassageNonTouchant" => &self.caillassage_non_touchant,
            "refusAvecInterp" => &self.refus_avec_interp,
            "refusSansInterp" => &self.refus_sans_interp,
            "obstacle" => &self.obstacle,
            "feuHabitation" => &self.feu_habitation,
            "feuVoitures" => &self.feu_voitures,
            "feuAutres" => &self.feu_autres,
            "papafTouchant" => &self.papaf_touchant,
            "papafNonTouchant" => &self.papaf_non_touchant,
            "grenMp7" => &self.gren_mp7,
            "grenCm6" => &self.gren_cm6,
            "grenGenlDmp" => &self.gren_genl_dmp,
            "grenGm2l" => &self.gren_gm2l,
            "grenGl304" => &self.gren_gl304,
            "munLbd40" => &self.mun_lbd40,
            "mun9mm" => &self.mun9mm,
            "mun556" => &self.mun556,
            "mun762" => &self.mun762,
            "commentairePam" => &self.commentaire_pam,
            "traite" => &self.traite,
            _ => return None,
        };
        Some(slot)
    }
}

/// A validated form record of a known kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "fields")]
pub enum FrontendRecord {
    #[serde(rename = "CRCA")]
    Crca(CrcaForm),
    #[serde(rename = "CRFM")]
    Crfm(CrfmForm),
}

impl FrontendRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            FrontendRecord::Crca(_) => RecordKind::Crca,
            FrontendRecord::Crfm(_) => RecordKind::Crfm,
        }
    }

    /// Value of a frontend key, `None` when absent or null
    ///
    /// Keys the form does not define also read as absent.
    pub fn value(&self, key: &str) -> Option<&FormValue> {
        let slot = match self {
            FrontendRecord::Crca(form) => form.slot(key),
            FrontendRecord::Crfm(form) => form.slot(key),
        };
        slot.and_then(Option::as_ref)
    }

    /// Validate a JSON object into a record
    ///
    /// With `kind` omitted the kind is inferred from the keys that carry a
    /// value (see [`infer_kind`]).
    pub fn from_json(kind: Option<RecordKind>, fields: Value) -> Result<Self> {
        let Value::Object(object) = fields else {
            return Err(Error::InvalidInput(
                "record must be a JSON object".to_string(),
            ));
        };

        let kind = match kind {
            Some(kind) => kind,
            None => infer_kind(&object)?,
        };

        let fields = Value::Object(object);
        let record = match kind {
            RecordKind::Crca => FrontendRecord::Crca(serde_json::from_value(fields).map_err(
                |e| Error::InvalidInput(format!("malformed CRCA record: {e}")),
            )?),
            RecordKind::Crfm => FrontendRecord::Crfm(serde_json::from_value(fields).map_err(
                |e| Error::InvalidInput(format!("malformed CRFM record: {e}")),
            )?),
        };

        Ok(record)
    }
}

fn carries_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        // Same rule as FormValue::is_blank: a list of empty strings is blank
        Value::Array(items) => items
            .iter()
            .any(|item| !matches!(item, Value::Null) && item.as_str() != Some("")),
        _ => true,
    }
}

/// Infer the kind of an untyped record
///
/// Keys that exist in only one kind's field table vote for that kind when
/// they carry a value. Exactly one kind must receive votes.
pub fn infer_kind(object: &Map<String, Value>) -> Result<RecordKind> {
    let voters: Vec<RecordKind> = RecordKind::ALL
        .into_iter()
        .filter(|kind| {
            distinguishing_keys(*kind)
                .any(|key| object.get(key).is_some_and(carries_value))
        })
        .collect();

    match voters.as_slice() {
        [kind] => Ok(*kind),
        [] => Err(Error::AmbiguousRecordKind(
            "no CRCA or CRFM specific field carries a value".to_string(),
        )),
        _ => Err(Error::AmbiguousRecordKind(
            "record mixes CRCA and CRFM specific fields".to_string(),
        )),
    }
}
