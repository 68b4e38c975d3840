use crate::application::refunds::RefundAction;
use crate::domain::refund::RefundId;
use crate::error::{RefundError, Result};
use serde::Deserialize;
use std::io::Read;

/// A raw row of the actions file.
///
/// `lines` is a `;`-separated list of order line ids. Leaving it empty on a
/// `create` row refunds every line of the order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub refund: Option<RefundId>,
    #[serde(default)]
    pub lines: Option<String>,
}

/// A validated instruction for the refund service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundCommand {
    Create {
        order: String,
        /// Empty means every line of the order.
        lines: Vec<u64>,
    },
    Process {
        refund: RefundId,
        action: RefundAction,
    },
}

impl TryFrom<ActionRecord> for RefundCommand {
    type Error = RefundError;

    fn try_from(record: ActionRecord) -> Result<Self> {
        if record.action.trim().eq_ignore_ascii_case("create") {
            let order = record
                .order
                .filter(|order| !order.is_empty())
                .ok_or_else(|| RefundError::Validation("create requires an order".into()))?;
            let lines = parse_lines(record.lines.as_deref().unwrap_or_default())?;
            return Ok(Self::Create { order, lines });
        }

        let action: RefundAction = record.action.parse()?;
        let refund = record.refund.ok_or_else(|| {
            RefundError::Validation(format!("{} requires a refund id", record.action))
        })?;
        Ok(Self::Process { refund, action })
    }
}

fn parse_lines(raw: &str) -> Result<Vec<u64>> {
    raw.split(';')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map_err(|_| RefundError::Validation(format!("invalid order line id '{id}'")))
        })
        .collect()
}

/// Reads refund actions from a CSV source.
///
/// Whitespace is trimmed and rows may omit trailing columns.
pub struct ActionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ActionReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates commands, one per row.
    pub fn commands(self) -> impl Iterator<Item = Result<RefundCommand>> {
        self.reader
            .into_deserialize::<ActionRecord>()
            .map(|result| result.map_err(RefundError::from).and_then(RefundCommand::try_from))
    }
}
