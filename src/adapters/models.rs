//! Normalized domain records produced by the source adapters (C4). These
//! mirror the upstream feed shapes closely; persistence beyond the
//! watermark/checkpoint/fetch-log substrate is a caller concern.

use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum VoteResult {
    Agreed,
    Negatived,
    Tie,
}

#[derive(Debug, Clone)]
pub struct VoteRecord {
    pub politician_parl_id: String,
    pub ballot: Ballot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ballot {
    Yea,
    Nay,
    Paired,
}

#[derive(Debug, Clone)]
pub struct VoteData {
    pub parliament: i32,
    pub session: i32,
    pub vote_number: i32,
    pub event_datetime: DateTime<Utc>,
    pub description_en: Option<String>,
    pub description_fr: Option<String>,
    pub bill_number: Option<String>,
    pub result: VoteResult,
    pub yeas: i32,
    pub nays: i32,
    pub paired: i32,
    pub records: Vec<VoteRecord>,
}

impl VoteData {
    pub fn token(&self) -> String {
        format!("{}:{}:{}", self.parliament, self.session, self.vote_number)
    }
}

#[derive(Debug, Clone)]
pub struct DebateData {
    pub source_id: i64,
    pub number: String,
    pub english_xml: Vec<u8>,
    pub french_xml: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CommitteeData {
    pub committee_id: String,
    pub parliament: i32,
    pub session: i32,
    pub committee_slug: String,
    pub acronym_en: String,
    pub acronym_fr: String,
    pub name_en: Option<String>,
    pub name_fr: Option<String>,
    pub chamber: String,
    pub source_url: String,
}

#[derive(Debug, Clone)]
pub struct CommitteeMeetingData {
    pub committee_slug: String,
    pub meeting_number: Option<i32>,
    pub parliament: i32,
    pub session: i32,
    pub meeting_date: Option<NaiveDate>,
    pub title_en: Option<String>,
    pub title_fr: Option<String>,
    pub source_url: Option<String>,
    pub witnesses: Vec<String>,
    pub documents: Vec<String>,
}
