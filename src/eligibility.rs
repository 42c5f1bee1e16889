use crate::error::ExamResult;
use crate::seating::AssignBy;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type StudentId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Other => "OTHER",
        }
    }

    pub fn parse(raw: &str) -> Option<Gender> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MALE" => Some(Gender::Male),
            "FEMALE" => Some(Gender::Female),
            "OTHER" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamFilterCriteria {
    pub class_id: i64,
    #[serde(default)]
    pub program_course_ids: Vec<i64>,
    #[serde(default)]
    pub paper_ids: Vec<i64>,
    #[serde(default)]
    pub academic_year_ids: Vec<i64>,
    /// Empty means every shift.
    #[serde(default)]
    pub shift_ids: Vec<i64>,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Uploaded roster restriction. When present, account status is not checked.
    #[serde(default)]
    pub uids: Vec<String>,
    #[serde(default)]
    pub assign_by: AssignBy,
}

impl ExamFilterCriteria {
    fn is_degenerate(&self) -> bool {
        self.paper_ids.is_empty()
            || self.program_course_ids.is_empty()
            || self.academic_year_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: i64,
    pub subject_id: i64,
    pub subject_type_id: i64,
    pub class_id: i64,
    pub program_course_id: i64,
    pub academic_year_id: i64,
    pub is_optional: bool,
    pub is_active: bool,
}

/// A promotion joined with its session's academic year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRecord {
    pub id: i64,
    pub student_id: StudentId,
    pub program_course_id: i64,
    pub session_id: i64,
    pub academic_year_id: i64,
    pub class_id: i64,
    pub shift_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub is_alumni: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSelection {
    pub id: i64,
    pub student_id: StudentId,
    pub subject_id: i64,
    pub subject_selection_meta_id: i64,
    pub version: i64,
    pub is_active: bool,
    pub updated_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Subject-selection meta record with the classes it is mapped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionMeta {
    pub id: i64,
    pub subject_type_id: i64,
    #[serde(default)]
    pub class_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccount {
    pub student_id: StudentId,
    pub uid: Option<String>,
    pub is_active: bool,
    pub gender: Option<Gender>,
}

/// Read access to the exam snapshot. Implementations may pre-filter by the
/// arguments they receive; the resolver re-applies every rule itself.
pub trait EligibilityDataset {
    fn papers(&self, paper_ids: &[i64]) -> ExamResult<Vec<Paper>>;
    fn promotions(
        &self,
        class_id: i64,
        program_course_ids: &[i64],
    ) -> ExamResult<Vec<PromotionRecord>>;
    fn subject_selections(&self, student_ids: &[StudentId]) -> ExamResult<Vec<SubjectSelection>>;
    fn selection_metas(&self) -> ExamResult<Vec<SelectionMeta>>;
    fn student_accounts(&self, student_ids: &[StudentId]) -> ExamResult<Vec<StudentAccount>>;
}

pub fn resolve_eligible_students<D>(
    criteria: &ExamFilterCriteria,
    dataset: &D,
) -> ExamResult<BTreeSet<StudentId>>
where
    D: EligibilityDataset + ?Sized,
{
    if criteria.is_degenerate() {
        tracing::debug!("empty paper, program course or academic year filter");
        return Ok(BTreeSet::new());
    }

    let papers = filter_papers(criteria, dataset.papers(&criteria.paper_ids)?);
    if papers.is_empty() {
        return Ok(BTreeSet::new());
    }

    let promotions = dataset.promotions(criteria.class_id, &criteria.program_course_ids)?;
    let mut current = latest_promotions(criteria, promotions);
    if current.is_empty() {
        return Ok(BTreeSet::new());
    }

    let mut candidate_ids: Vec<StudentId> = current.keys().copied().collect();
    candidate_ids.sort_unstable();
    let accounts: HashMap<StudentId, StudentAccount> = dataset
        .student_accounts(&candidate_ids)?
        .into_iter()
        .map(|a| (a.student_id, a))
        .collect();
    current.retain(|sid, _| {
        accounts
            .get(sid)
            .map(|a| account_admits(criteria, a))
            .unwrap_or(false)
    });

    let mut eligible = BTreeSet::new();

    for (sid, promotion) in &current {
        let mandatory = papers
            .iter()
            .any(|p| !p.is_optional && cohort_matches(p, promotion));
        if mandatory {
            eligible.insert(*sid);
        }
    }
    let mandatory_count = eligible.len();

    let optional_papers: Vec<&Paper> = papers.iter().filter(|p| p.is_optional).collect();
    if !optional_papers.is_empty() && !current.is_empty() {
        let mut ids: Vec<StudentId> = current.keys().copied().collect();
        ids.sort_unstable();
        let selections = latest_selections(dataset.subject_selections(&ids)?);
        let metas: HashMap<i64, SelectionMeta> = dataset
            .selection_metas()?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        for (sid, promotion) in &current {
            let Some(chosen) = selections.get(sid) else {
                continue;
            };
            let picked = optional_papers.iter().any(|paper| {
                cohort_matches(paper, promotion)
                    && chosen.iter().any(|sel| {
                        sel.subject_id == paper.subject_id
                            && metas
                                .get(&sel.subject_selection_meta_id)
                                .map(|m| {
                                    m.subject_type_id == paper.subject_type_id
                                        && m.class_ids.contains(&paper.class_id)
                                })
                                .unwrap_or(false)
                    })
            });
            if picked {
                eligible.insert(*sid);
            }
        }
    }

    tracing::debug!(
        papers = papers.len(),
        cohort = current.len(),
        mandatory = mandatory_count,
        eligible = eligible.len(),
        "resolved eligible students"
    );
    Ok(eligible)
}

fn filter_papers(criteria: &ExamFilterCriteria, papers: Vec<Paper>) -> Vec<Paper> {
    papers
        .into_iter()
        .filter(|p| {
            p.is_active
                && criteria.paper_ids.contains(&p.id)
                && p.class_id == criteria.class_id
                && criteria.program_course_ids.contains(&p.program_course_id)
                && criteria.academic_year_ids.contains(&p.academic_year_id)
        })
        .collect()
}

fn cohort_matches(paper: &Paper, promotion: &PromotionRecord) -> bool {
    paper.program_course_id == promotion.program_course_id && paper.class_id == promotion.class_id
}

fn account_admits(criteria: &ExamFilterCriteria, account: &StudentAccount) -> bool {
    if criteria.uids.is_empty() {
        if !account.is_active {
            return false;
        }
    } else {
        let listed = account
            .uid
            .as_deref()
            .map(|uid| criteria.uids.iter().any(|u| u == uid))
            .unwrap_or(false);
        if !listed {
            return false;
        }
    }
    match criteria.gender {
        Some(g) => account.gender == Some(g),
        None => true,
    }
}

/// Latest matching promotion per student. Records are restricted first, then
/// ranked by start date (missing dates rank oldest), creation time and id.
pub fn latest_promotions(
    criteria: &ExamFilterCriteria,
    records: Vec<PromotionRecord>,
) -> HashMap<StudentId, PromotionRecord> {
    let mut latest: HashMap<StudentId, PromotionRecord> = HashMap::new();
    for rec in records {
        if rec.is_alumni
            || rec.class_id != criteria.class_id
            || !criteria.program_course_ids.contains(&rec.program_course_id)
            || !criteria.academic_year_ids.contains(&rec.academic_year_id)
        {
            continue;
        }
        if !criteria.shift_ids.is_empty()
            && !rec
                .shift_id
                .map(|s| criteria.shift_ids.contains(&s))
                .unwrap_or(false)
        {
            continue;
        }
        let newer = latest
            .get(&rec.student_id)
            .map_or(true, |cur| promotion_key(&rec) > promotion_key(cur));
        if newer {
            latest.insert(rec.student_id, rec);
        }
    }
    latest
}

// Option orders None below Some, which is "nulls last" for a descending pick.
fn promotion_key(p: &PromotionRecord) -> (Option<NaiveDate>, NaiveDateTime, i64) {
    (p.start_date, p.created_at, p.id)
}

fn selection_key(s: &SubjectSelection) -> (i64, Option<NaiveDateTime>, NaiveDateTime, i64) {
    (s.version, s.updated_at, s.created_at, s.id)
}

/// Latest active selection per (student, meta), grouped by student.
pub fn latest_selections(
    records: Vec<SubjectSelection>,
) -> HashMap<StudentId, Vec<SubjectSelection>> {
    let mut latest: HashMap<(StudentId, i64), SubjectSelection> = HashMap::new();
    for rec in records.into_iter().filter(|s| s.is_active) {
        let key = (rec.student_id, rec.subject_selection_meta_id);
        let newer = latest
            .get(&key)
            .map_or(true, |cur| selection_key(&rec) > selection_key(cur));
        if newer {
            latest.insert(key, rec);
        }
    }

    let mut by_student: HashMap<StudentId, Vec<SubjectSelection>> = HashMap::new();
    for ((sid, _), sel) in latest {
        by_student.entry(sid).or_default().push(sel);
    }
    by_student
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortCombination {
    pub program_course_id: i64,
    /// Zero means every shift.
    #[serde(default)]
    pub shift_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortCount {
    pub program_course_id: i64,
    pub shift_id: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub breakdown: Vec<CohortCount>,
    pub total: usize,
}

/// Eligible counts per (program course, shift) pair. The total is the sum of
/// the per-pair counts.
pub fn count_breakdown<D>(
    criteria: &ExamFilterCriteria,
    combinations: &[CohortCombination],
    dataset: &D,
) -> ExamResult<Breakdown>
where
    D: EligibilityDataset + ?Sized,
{
    let mut breakdown = Vec::with_capacity(combinations.len());
    for combo in combinations {
        let scoped = ExamFilterCriteria {
            program_course_ids: vec![combo.program_course_id],
            shift_ids: if combo.shift_id != 0 {
                vec![combo.shift_id]
            } else {
                Vec::new()
            },
            ..criteria.clone()
        };
        let count = resolve_eligible_students(&scoped, dataset)?.len();
        breakdown.push(CohortCount {
            program_course_id: combo.program_course_id,
            shift_id: combo.shift_id,
            count,
        });
    }
    let total = breakdown.iter().map(|c| c.count).sum();
    Ok(Breakdown { breakdown, total })
}
