use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::job::{JobRecord, JobStatus};

/// The only descriptor type this watcher acts on
pub const ACCEPTED_KIND: &str = "TRANSCODINGJOB";

/// Root element name of the engine's descriptor documents
const ROOT_ELEMENT: &str = "cnpsXML";

/// Timestamp layouts seen in submission display names
const QUEUED_TIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Why a descriptor was not turned into a job record.
///
/// None of these are errors to surface: the caller logs at debug level and
/// moves on to the next descriptor.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("malformed descriptor: {0}")]
    Syntax(String),
    #[error("not a job descriptor document")]
    NotJobDocument,
    #[error("unexpected job kind: {0}")]
    WrongKind(String),
    #[error("missing required section: {0}")]
    MissingSection(&'static str),
    #[error("no recognized source file shape")]
    UnresolvedSource,
    #[error("missing or non-numeric progress attribute")]
    MissingProgress,
    #[error("completed job without destination data")]
    MissingDestination,
}

/// Parse one raw descriptor into a job record.
///
/// `id` is the descriptor file name without extension and becomes the
/// record's identity across polls. The record's `observed_at` is left unset;
/// the caller stamps it from the descriptor's mtime for completed jobs.
pub fn parse(id: &str, raw: &str) -> Result<JobRecord, Rejection> {
    let root = read_tree(raw)?;
    if root.name != ROOT_ELEMENT {
        return Err(Rejection::NotJobDocument);
    }

    let kind = root.attr("TypeName").unwrap_or_default();
    if kind != ACCEPTED_KIND {
        return Err(Rejection::WrongKind(kind.to_string()));
    }

    let worker = root
        .child("WorkerData")
        .ok_or(Rejection::MissingSection("WorkerData"))?;
    let submit = root
        .child("JobSubmitInfo")
        .ok_or(Rejection::MissingSection("JobSubmitInfo"))?;

    let sources = worker
        .child("Sources")
        .ok_or(Rejection::UnresolvedSource)?;
    let (source_path, queued_placeholder) = resolve_source(sources)?;

    let mut record = JobRecord {
        id: id.to_string(),
        kind: kind.to_string(),
        source_name: file_base_name(&source_path),
        queued_at: queued_time(submit.attr("Name").unwrap_or_default()),
        status: JobStatus::Queued,
        progress: 0,
        error: None,
        destination: None,
        file_size: None,
        observed_at: None,
    };

    let progress = root.attr("PROGRESS.DWD").and_then(|v| v.parse::<u32>().ok());

    if let Some(error) = failure_payload(&root) {
        record.status = JobStatus::Failed;
        record.error = Some(error);
        record.progress = progress.unwrap_or(0);
        return Ok(record);
    }

    let progress = progress.ok_or(Rejection::MissingProgress)?;
    record.progress = progress;

    if progress < 100 {
        record.status = if queued_placeholder {
            JobStatus::Queued
        } else {
            JobStatus::Started
        };
        return Ok(record);
    }

    let targets = worker
        .child("Destinations")
        .and_then(|d| d.child("Module_0"))
        .and_then(|m| m.child("TargetFiles"))
        .ok_or(Rejection::MissingDestination)?;
    let destination = targets
        .attr("File_0")
        .ok_or(Rejection::MissingDestination)?;
    let file_size = targets
        .attr("FileSize_0.QWD")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(Rejection::MissingDestination)?;

    record.status = JobStatus::Completed;
    record.destination = Some(PathBuf::from(destination));
    record.file_size = Some(file_size);
    Ok(record)
}

/// Where a source file path may live inside `WorkerData/Sources`.
///
/// The engine has produced three layouts over its lifetime; they are tried
/// in priority order and the first match wins. The bool marks the nested
/// multi-source layout, a batch placeholder whose progress is not yet
/// meaningful.
type SourceShape = fn(&XmlElement) -> Option<(String, bool)>;

const SOURCE_SHAPES: &[SourceShape] = &[
    explicit_file_list,
    direct_module_filename,
    nested_multi_source,
];

fn resolve_source(sources: &XmlElement) -> Result<(String, bool), Rejection> {
    SOURCE_SHAPES
        .iter()
        .find_map(|shape| shape(sources))
        .ok_or(Rejection::UnresolvedSource)
}

fn explicit_file_list(sources: &XmlElement) -> Option<(String, bool)> {
    let file = sources.child("SourceFiles")?.attr("File_0")?;
    Some((file.to_string(), false))
}

fn direct_module_filename(sources: &XmlElement) -> Option<(String, bool)> {
    let file = sources.child("Module_0")?.attr("Filename")?;
    Some((file.to_string(), false))
}

fn nested_multi_source(sources: &XmlElement) -> Option<(String, bool)> {
    let file = sources
        .child("Module_0")?
        .child("ModuleData")?
        .child("SourceModules")?
        .child("MultiSrcModule_0")?
        .attr("Filename")?;
    Some((file.to_string(), true))
}

/// Last path component with the extension stripped.
///
/// Descriptors come from a Windows host, so both separators are honored.
fn file_base_name(path: &str) -> String {
    let name = path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path);
    match name.rfind('.') {
        Some(index) => name[..index].to_string(),
        None => name.to_string(),
    }
}

/// Extract the submission time from a display name like "title (2019/03/01 12:00:00)".
///
/// Anything short of a parseable bracketed timestamp degrades to None.
fn queued_time(name: &str) -> Option<NaiveDateTime> {
    let open = name.find('(')?;
    let rest = &name[open + 1..];
    let close = rest.find(')')?;
    let text = rest[..close].trim();
    QUEUED_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Non-empty `Failures/Errors` content, if any.
///
/// An `Errors` element that is present but has no attributes, children or
/// text is not a failure.
fn failure_payload(root: &XmlElement) -> Option<String> {
    let errors = root.child("Failures")?.child("Errors")?;
    if errors.is_empty() {
        return None;
    }
    if !errors.text.is_empty() && errors.attrs.is_empty() && errors.children.is_empty() {
        return Some(errors.text.clone());
    }
    Some(errors.render_content())
}

/// Minimal attribute/child-element tree over one descriptor document.
#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attrs: BTreeMap<String, String>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.children.is_empty() && self.text.is_empty()
    }

    /// Render attributes and children back to a compact XML-ish string,
    /// used for opaque error payloads.
    fn render_content(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.attrs {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("{}=\"{}\"", key, value));
        }
        for child in &self.children {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push('<');
            out.push_str(&child.name);
            let inner = child.render_content();
            if !inner.is_empty() {
                out.push(' ');
                out.push_str(&inner);
            }
            out.push_str("/>");
        }
        if !self.text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&self.text);
        }
        out
    }
}

fn read_tree(raw: &str) -> Result<XmlElement, Rejection> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(element_from(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from(e)?;
                place(element, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Rejection::Syntax("unbalanced end tag".to_string()))?;
                place(element, &mut stack, &mut root)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    let decoded = e.decode().unwrap_or_default();
                    let unescaped = quick_xml::escape::unescape(&decoded)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| decoded.into_owned());
                    current.text.push_str(&unescaped);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Rejection::Syntax(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(Rejection::Syntax("unclosed element".to_string()));
    }
    root.ok_or(Rejection::NotJobDocument)
}

fn place(
    element: XmlElement,
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
) -> Result<(), Rejection> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_some() {
                return Err(Rejection::Syntax("multiple root elements".to_string()));
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn element_from(start: &quick_xml::events::BytesStart<'_>) -> Result<XmlElement, Rejection> {
    let mut element = XmlElement {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Rejection::Syntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Rejection::Syntax(e.to_string()))?
            .into_owned();
        element.attrs.insert(key, value);
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn running_descriptor(progress: u32) -> String {
        format!(
            r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="{progress}">
                 <WorkerData>
                   <Sources>
                     <SourceFiles File_0="D:\media\show.avi"/>
                   </Sources>
                 </WorkerData>
                 <JobSubmitInfo Name="show (2019/03/01 12:00:00)"/>
               </cnpsXML>"#
        )
    }

    fn completed_descriptor() -> String {
        r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="100">
             <WorkerData>
               <Sources>
                 <SourceFiles File_0="D:\media\show.avi"/>
               </Sources>
               <Destinations>
                 <Module_0>
                   <TargetFiles File_0="E:\out\show.mxf" FileSize_0.QWD="1048576"/>
                 </Module_0>
               </Destinations>
             </WorkerData>
             <JobSubmitInfo Name="show (2019/03/01 12:00:00)"/>
           </cnpsXML>"#
            .to_string()
    }

    #[test]
    fn parses_running_job() {
        let record = parse("job42", &running_descriptor(40)).unwrap();
        assert_eq!(record.id, "job42");
        assert_eq!(record.kind, ACCEPTED_KIND);
        assert_eq!(record.source_name, "show");
        assert_eq!(record.status, JobStatus::Started);
        assert_eq!(record.progress, 40);
        assert_eq!(
            record.queued_at,
            Some(
                NaiveDate::from_ymd_opt(2019, 3, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap()
            )
        );
        assert!(record.error.is_none());
        assert!(record.destination.is_none());
    }

    #[test]
    fn rejects_wrong_kind() {
        let raw = running_descriptor(40).replace("TRANSCODINGJOB", "COPYJOB");
        assert!(matches!(
            parse("job", &raw),
            Err(Rejection::WrongKind(kind)) if kind == "COPYJOB"
        ));
    }

    #[test]
    fn rejects_missing_type_tag() {
        let raw = running_descriptor(40).replace("TypeName=\"TRANSCODINGJOB\" ", "");
        assert!(matches!(parse("job", &raw), Err(Rejection::WrongKind(_))));
    }

    #[test]
    fn rejects_non_descriptor_root() {
        assert!(matches!(
            parse("job", "<SomethingElse/>"),
            Err(Rejection::NotJobDocument)
        ));
    }

    #[test]
    fn rejects_missing_sections() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB">
                       <JobSubmitInfo Name="x"/>
                     </cnpsXML>"#;
        assert!(matches!(
            parse("job", raw),
            Err(Rejection::MissingSection("WorkerData"))
        ));

        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB">
                       <WorkerData><Sources><SourceFiles File_0="a.avi"/></Sources></WorkerData>
                     </cnpsXML>"#;
        assert!(matches!(
            parse("job", raw),
            Err(Rejection::MissingSection("JobSubmitInfo"))
        ));
    }

    #[test]
    fn resolves_direct_module_shape() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="10">
                       <WorkerData>
                         <Sources>
                           <Module_0 Filename="D:/media/clip.mp4"/>
                         </Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="clip"/>
                     </cnpsXML>"#;
        let record = parse("job", raw).unwrap();
        assert_eq!(record.source_name, "clip");
        assert_eq!(record.status, JobStatus::Started);
    }

    #[test]
    fn nested_multi_source_forces_queued() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="55">
                       <WorkerData>
                         <Sources>
                           <Module_0>
                             <ModuleData>
                               <SourceModules>
                                 <MultiSrcModule_0 Filename="D:\batch\reel.avi"/>
                               </SourceModules>
                             </ModuleData>
                           </Module_0>
                         </Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="reel"/>
                     </cnpsXML>"#;
        let record = parse("job", raw).unwrap();
        assert_eq!(record.source_name, "reel");
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.progress, 55);
    }

    #[test]
    fn rejects_unresolved_source_shape() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="10">
                       <WorkerData>
                         <Sources>
                           <Module_0><ModuleData/></Module_0>
                         </Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="x"/>
                     </cnpsXML>"#;
        assert!(matches!(parse("job", raw), Err(Rejection::UnresolvedSource)));
    }

    #[test]
    fn parses_completed_job_with_destination() {
        let record = parse("job", &completed_descriptor()).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.destination, Some(PathBuf::from(r"E:\out\show.mxf")));
        assert_eq!(record.file_size, Some(1_048_576));
    }

    #[test]
    fn rejects_completed_job_without_destination() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="100">
                       <WorkerData>
                         <Sources><SourceFiles File_0="D:\media\show.avi"/></Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="show"/>
                     </cnpsXML>"#;
        assert!(matches!(
            parse("job", raw),
            Err(Rejection::MissingDestination)
        ));
    }

    #[test]
    fn failed_job_keeps_error_payload() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="63">
                       <WorkerData>
                         <Sources><SourceFiles File_0="D:\media\show.avi"/></Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="show"/>
                       <Failures>
                         <Errors>
                           <Error_0 Description="disk full"/>
                         </Errors>
                       </Failures>
                     </cnpsXML>"#;
        let record = parse("job", raw).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.progress, 63);
        let error = record.error.unwrap();
        assert!(error.contains("disk full"), "payload was: {error}");
        assert!(record.destination.is_none());
    }

    #[test]
    fn empty_errors_section_is_not_a_failure() {
        let raw = r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="80">
                       <WorkerData>
                         <Sources><SourceFiles File_0="D:\media\show.avi"/></Sources>
                       </WorkerData>
                       <JobSubmitInfo Name="show"/>
                       <Failures>
                         <Errors></Errors>
                       </Failures>
                     </cnpsXML>"#;
        let record = parse("job", raw).unwrap();
        assert_eq!(record.status, JobStatus::Started);
        assert_eq!(record.progress, 80);
        assert!(record.error.is_none());
    }

    #[test]
    fn out_of_range_progress_passes_through() {
        let raw = completed_descriptor().replace("PROGRESS.DWD=\"100\"", "PROGRESS.DWD=\"150\"");
        let record = parse("job", &raw).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 150);
    }

    #[test]
    fn missing_progress_rejects() {
        let raw = running_descriptor(40).replace(" PROGRESS.DWD=\"40\"", "");
        assert!(matches!(parse("job", &raw), Err(Rejection::MissingProgress)));
    }

    #[test]
    fn queued_time_edge_cases() {
        assert!(queued_time("no brackets at all").is_none());
        assert!(queued_time("only open (2019/03/01 12:00:00").is_none());
        assert!(queued_time("backwards ) then (").is_none());
        assert!(queued_time("garbage (not a time)").is_none());
        assert_eq!(
            queued_time("title (2019-03-01 12:00:00) suffix"),
            Some(
                NaiveDate::from_ymd_opt(2019, 3, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn base_name_handles_both_separators() {
        assert_eq!(file_base_name(r"D:\media\show.avi"), "show");
        assert_eq!(file_base_name("/mnt/media/show.avi"), "show");
        assert_eq!(file_base_name("noext"), "noext");
        assert_eq!(file_base_name(r"D:\media\two.part.avi"), "two.part");
    }

    proptest! {
        /// Progress is passed through exactly as parsed, with no range
        /// validation, for every value the running path can represent.
        #[test]
        fn progress_pass_through(progress in 0u32..100) {
            let record = parse("job", &running_descriptor(progress)).unwrap();
            prop_assert_eq!(record.progress, progress);
        }

        /// Failed jobs report failure regardless of the progress value.
        #[test]
        fn failure_wins_over_progress(progress in 0u32..500) {
            let raw = format!(
                r#"<cnpsXML TypeName="TRANSCODINGJOB" PROGRESS.DWD="{progress}">
                     <WorkerData>
                       <Sources><SourceFiles File_0="a.avi"/></Sources>
                     </WorkerData>
                     <JobSubmitInfo Name="a"/>
                     <Failures><Errors><Error_0 Description="boom"/></Errors></Failures>
                   </cnpsXML>"#
            );
            let record = parse("job", &raw).unwrap();
            prop_assert_eq!(record.status, JobStatus::Failed);
            prop_assert_eq!(record.progress, progress);
        }
    }
}
