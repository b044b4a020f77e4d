//! Log por job: todo evento emitido dentro de un span `job` (con campo
//! `job_id`) se agrega a `<output>/<job_id>.log`. Es el archivo que sirve
//! `GET /jobs/{id}/logs`.

use chrono::{SecondsFormat, Utc};
use common::JobId;
use std::{
    fmt::{self, Write as _},
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};
use tracing::{
    field::{Field, Visit},
    span::{Attributes, Id},
    Event, Subscriber,
};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

pub const JOB_SPAN: &str = "job";

pub fn log_path(dir: &Path, id: JobId) -> PathBuf {
    dir.join(format!("{id}.log"))
}

pub struct JobLogLayer {
    dir: PathBuf,
}

impl JobLogLayer {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn append(&self, id: JobId, line: &str) {
        let path = log_path(&self.dir, id);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            // Dentro de un Layer no se puede loguear con tracing.
            eprintln!("no se pudo escribir {}: {e}", path.display());
        }
    }
}

/// Marca guardada en las extensiones del span `job`.
struct JobMarker(JobId);

#[derive(Default)]
struct JobIdVisitor(Option<JobId>);

impl Visit for JobIdVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "job_id" {
            self.0 = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "job_id" && value >= 0 {
            self.0 = Some(value as u64);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "job_id" {
            self.0 = format!("{value:?}").trim_matches('"').parse().ok();
        }
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S> Layer<S> for JobLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != JOB_SPAN {
            return;
        }
        let mut visitor = JobIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(job_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(JobMarker(job_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let Some(job_id) = scope
            .from_root()
            .find_map(|span| span.extensions().get::<JobMarker>().map(|m| m.0))
        else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "{} {:>5} {}{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event.metadata().level().as_str(),
            visitor.message,
            visitor.fields
        );
        self.append(job_id, &line);
    }
}
