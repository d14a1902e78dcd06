use indexmap::IndexMap;

use npuasm_isa::{mm2s_channel, s2mm_channel, tile_address};

use crate::error::{Error, Result};
use crate::lexer::{AsmItem, AsmItemKind, parse_items};
use crate::ops::{OpKind, lookup};

pub type JobId = i64;

/// Sentinel job closing the program.
pub const EOF_ID: JobId = 0xFFFF_FFFF;
/// First id of the descending end-of-packet job family.
pub const EOP_ID: JobId = 0xFFFF_FFFE;
/// User job ids must fit the 24-bit instruction operand, which also keeps
/// them clear of the sentinel range.
const MAX_USER_JOB_ID: JobId = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeSection {
    #[default]
    Text,
    Data,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub pos: u32,
    pub index: u32,
    /// Items covered by this label, and their summed byte size.
    pub count: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub start: u32,
    pub start_index: u32,
    pub end: u32,
    pub end_index: u32,
    pub eopnum: u32,
    pub deferred: bool,
    /// Jobs this job launches.
    pub dependents: Vec<JobId>,
    /// Local barriers this job participates in.
    pub barriers: Vec<i64>,
}

impl Job {
    fn open(id: JobId, pos: u32, index: u32, eopnum: u32, deferred: bool) -> Self {
        Self {
            id,
            start: pos,
            start_index: index,
            end: pos,
            end_index: index,
            eopnum,
            deferred,
            dependents: Vec::new(),
            barriers: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FirstPass {
    pub items: Vec<AsmItem>,
    pub labels: IndexMap<String, Label>,
    pub jobs: IndexMap<JobId, Job>,
    /// Local barrier id to the jobs participating in it.
    pub barrier_jobs: IndexMap<i64, Vec<JobId>>,
    /// Launched job id to the jobs that launch it.
    pub job_launchers: IndexMap<JobId, Vec<JobId>>,
    /// Total byte size of the program.
    pub size: u32,
}

/// A numeric argument that names a symbol not (yet) known. Recoverable: the
/// second pass retries against the completed label map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub name: String,
}

/// Parse one numeric operand. Accepts label references (`@name`), tile and
/// DMA-channel coordinates, hex and decimal literals; anything else is an
/// unresolved symbol for the caller to defer or reject.
pub fn parse_num_arg(
    text: &str,
    labels: &IndexMap<String, Label>,
) -> std::result::Result<u32, Unresolved> {
    let unresolved = || Unresolved {
        name: text.to_string(),
    };

    if let Some(name) = text.strip_prefix('@') {
        return labels.get(name).map(|label| label.pos).ok_or(Unresolved {
            name: name.to_string(),
        });
    }
    if let Some(rest) = text.strip_prefix("tile_") {
        if let Some((col, row)) = rest.rsplit_once('_') {
            if let (Ok(col), Ok(row)) = (col.parse::<u32>(), row.parse::<u32>()) {
                return Ok(tile_address(col, row));
            }
        }
        return Err(unresolved());
    }
    if let Some(rest) = text.strip_prefix("s2mm_") {
        return rest.parse().map(s2mm_channel).map_err(|_| unresolved());
    }
    if let Some(rest) = text.strip_prefix("mm2s_") {
        return rest.parse().map(mm2s_channel).map_err(|_| unresolved());
    }
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(digits, 16).map_err(|_| unresolved());
    }
    if !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit()) {
        if let Ok(value) = text.parse() {
            return Ok(value);
        }
    }
    Err(unresolved())
}

/// First pass: assign byte positions and sizes, build the label and job
/// tables, and validate the job graph.
pub fn first_pass(mut items: Vec<AsmItem>) -> Result<FirstPass> {
    let mut pass = FirstPass::default();
    let mut pos = 0u32;
    let mut section = CodeSection::Text;
    let mut eopnum = 0u32;
    let mut active_label: Option<String> = None;
    let mut cjob: Option<JobId> = None;

    for (item_index, item) in items.iter_mut().enumerate() {
        let index = item_index as u32;
        match &item.kind {
            AsmItemKind::Label { name } => {
                section = CodeSection::Data;
                if pass.labels.contains_key(name) {
                    return Err(Error::DuplicateLabel { name: name.clone() });
                }
                active_label = Some(name.clone());
                pass.labels.insert(
                    name.clone(),
                    Label {
                        name: name.clone(),
                        pos,
                        index,
                        count: 0,
                        size: 0,
                    },
                );
                item.size = 0;
            }
            AsmItemKind::Op { mnemonic, args } => {
                let op = lookup(mnemonic).ok_or_else(|| Error::UnknownMnemonic {
                    mnemonic: mnemonic.clone(),
                })?;
                if args.len() != op.arg_count() {
                    return Err(Error::WrongArgumentCount {
                        mnemonic: mnemonic.clone(),
                        expected: op.arg_count(),
                        got: args.len(),
                    });
                }

                match op {
                    OpKind::StartJob | OpKind::StartJobDeferred => {
                        active_label = None;
                        let id = job_id_arg(mnemonic, &args[0], &pass.labels)?;
                        if let Some(open) = cjob {
                            return Err(Error::NestedJob { id, open });
                        }
                        if pass.jobs.contains_key(&id) {
                            return Err(Error::DuplicateJob { id });
                        }
                        pass.jobs.insert(
                            id,
                            Job::open(id, pos, index, eopnum, op == OpKind::StartJobDeferred),
                        );
                        cjob = Some(id);
                    }
                    OpKind::Eof => {
                        if pass.jobs.contains_key(&EOF_ID) {
                            return Err(Error::DuplicateJob { id: EOF_ID });
                        }
                        pass.jobs
                            .insert(EOF_ID, Job::open(EOF_ID, pos, index, eopnum, false));
                    }
                    OpKind::Word if section == CodeSection::Text => {
                        return Err(Error::WordOutsideData);
                    }
                    _ => {}
                }

                let align_to = match op {
                    OpKind::Align => Some(numeric_arg(mnemonic, &args[0], &pass.labels)?),
                    _ => None,
                };
                let size = op.size(pos, align_to)?;
                item.size = size;
                pos += size;

                match op {
                    OpKind::Eof => {
                        if let Some(open) = cjob.take() {
                            close_job(&mut pass.jobs, open, pos, index);
                        }
                        close_job(&mut pass.jobs, EOF_ID, pos, index);
                    }
                    OpKind::Eop => {
                        let id = EOP_ID - JobId::from(eopnum);
                        pass.jobs.insert(id, Job::open(id, pos, index, eopnum, false));
                        eopnum += 1;
                    }
                    OpKind::LocalBarrier => {
                        let Some(job) = cjob else {
                            return Err(Error::OpOutsideJob {
                                mnemonic: mnemonic.clone(),
                            });
                        };
                        let barrier = i64::from(numeric_arg(mnemonic, &args[0], &pass.labels)?);
                        job_entry(&mut pass.jobs, job).barriers.push(barrier);
                        pass.barrier_jobs.entry(barrier).or_default().push(job);
                    }
                    OpKind::LaunchJob => {
                        let Some(job) = cjob else {
                            return Err(Error::OpOutsideJob {
                                mnemonic: mnemonic.clone(),
                            });
                        };
                        let target = job_id_arg(mnemonic, &args[0], &pass.labels)?;
                        job_entry(&mut pass.jobs, job).dependents.push(target);
                        pass.job_launchers.entry(target).or_default().push(job);
                    }
                    OpKind::EndJob => {
                        let Some(job) = cjob.take() else {
                            return Err(Error::EndWithoutJob);
                        };
                        close_job(&mut pass.jobs, job, pos, index);
                    }
                    _ => {}
                }
            }
        }

        if let Some(label) = &active_label {
            if item.name() != ".align" && item.name() != ".eop" {
                let entry = pass
                    .labels
                    .get_mut(label)
                    .expect("active label was just recorded");
                entry.count += 1;
                entry.size += item.size;
            }
        }
        item.section = section;
    }

    if let Some(open) = cjob {
        return Err(Error::UnterminatedJob { id: open });
    }
    for target in pass.job_launchers.keys() {
        if !pass.jobs.contains_key(target) {
            return Err(Error::LaunchTargetUndeclared { id: *target });
        }
    }

    pass.size = pos;
    pass.items = items;
    Ok(pass)
}

/// Serialized program: text and data streams plus the first-pass tables.
#[derive(Debug)]
pub struct Program {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub pass: FirstPass,
}

/// Both passes over a source text. The second pass re-parses numeric
/// arguments against the completed label map, so forward references resolve;
/// anything still unknown is an error naming the symbol.
pub fn assemble_source(source: &str) -> Result<Program> {
    let items = parse_items(source)?;
    let pass = first_pass(items)?;

    let mut text = Vec::new();
    let mut data = Vec::new();
    let mut pos = 0u32;
    for item in &pass.items {
        let AsmItemKind::Op { mnemonic, args } = &item.kind else {
            continue;
        };
        let op = lookup(mnemonic).ok_or_else(|| Error::UnknownMnemonic {
            mnemonic: mnemonic.clone(),
        })?;
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            resolved.push(
                parse_num_arg(arg, &pass.labels)
                    .map_err(|unresolved| Error::UnresolvedSymbol {
                        name: unresolved.name,
                    })?,
            );
        }
        let out = match item.section {
            CodeSection::Text => &mut text,
            CodeSection::Data => &mut data,
        };
        op.encode(out, pos, &resolved)?;
        pos += item.size;
    }

    Ok(Program { text, data, pass })
}

fn numeric_arg(mnemonic: &str, text: &str, labels: &IndexMap<String, Label>) -> Result<u32> {
    parse_num_arg(text, labels).map_err(|_| Error::BadNumericArgument {
        mnemonic: mnemonic.to_string(),
        text: text.to_string(),
    })
}

fn job_id_arg(mnemonic: &str, text: &str, labels: &IndexMap<String, Label>) -> Result<JobId> {
    let id = JobId::from(numeric_arg(mnemonic, text, labels)?);
    if id > MAX_USER_JOB_ID {
        return Err(Error::JobIdOutOfRange { id });
    }
    Ok(id)
}

fn close_job(jobs: &mut IndexMap<JobId, Job>, id: JobId, pos: u32, index: u32) {
    let job = job_entry(jobs, id);
    job.end = pos;
    job.end_index = index;
}

fn job_entry(jobs: &mut IndexMap<JobId, Job>, id: JobId) -> &mut Job {
    jobs.get_mut(&id).expect("job table holds every open job")
}
