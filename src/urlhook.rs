//! A hook sending a HTTP request per operation, for example to notify a
//! web API of uploads.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::collections::HashMap;
use std::time::Duration;

use crate::attrs::Attrs;
use crate::hooks::{HookResult, RequestSnafu, SftpHook};
use crate::proto::OpenFlags;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a form encoded request for each hooked operation.
///
/// Each operation may call several urls, the combinations of a list of
/// base urls and a list of paths:
///
/// - base urls are looked up by operation name with
///   [`map_urls`](Self::map_urls), defaulting to the url given to `new()`.
/// - paths are looked up with [`map_paths`](Self::map_paths), defaulting to
///   the operation name. Map to an empty path to call the base url itself.
///
/// The form holds `method` (the operation name) and the operation's
/// arguments, plus any [`extra`](Self::extra) fields.
pub struct UrlRequestHook {
    request_url: String,
    request_method: String,
    request_auth: Option<String>,
    urls_mapping: HashMap<String, Vec<String>>,
    paths_mapping: HashMap<String, Vec<String>>,
    extra_data: Vec<(String, String)>,
    agent: ureq::Agent,
}

impl core::fmt::Debug for UrlRequestHook {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UrlRequestHook")
            .field("request_url", &self.request_url)
            .field("request_method", &self.request_method)
            .field("urls_mapping", &self.urls_mapping)
            .field("paths_mapping", &self.paths_mapping)
            .finish_non_exhaustive()
    }
}

type Form = Vec<(&'static str, String)>;

impl UrlRequestHook {
    pub fn new(request_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            request_url: request_url.into(),
            request_method: "POST".into(),
            request_auth: None,
            urls_mapping: HashMap::new(),
            paths_mapping: HashMap::new(),
            extra_data: Vec::new(),
            agent,
        }
    }

    /// HTTP method, `POST` by default
    pub fn method(mut self, method: &str) -> Self {
        self.request_method = method.to_ascii_uppercase();
        self
    }

    /// Value of an `Authorization` header sent with every request
    pub fn auth(mut self, value: &str) -> Self {
        self.request_auth = Some(value.into());
        self
    }

    pub fn map_urls(mut self, op: &str, urls: &[&str]) -> Self {
        self.urls_mapping
            .insert(op.into(), urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn map_paths(mut self, op: &str, paths: &[&str]) -> Self {
        self.paths_mapping
            .insert(op.into(), paths.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Adds a field to every request. Overrides an argument of the same name.
    pub fn extra(mut self, key: &str, value: &str) -> Self {
        self.extra_data.push((key.into(), value.into()));
        self
    }

    /// The urls called for an operation
    pub fn get_urls(&self, op: &str) -> Vec<String> {
        let default_url = [self.request_url.clone()];
        let default_path = [op.to_string()];
        let base_urls: &[String] =
            self.urls_mapping.get(op).map_or(&default_url[..], |u| u.as_slice());
        let paths: &[String] =
            self.paths_mapping.get(op).map_or(&default_path[..], |p| p.as_slice());

        base_urls
            .iter()
            .flat_map(|u| paths.iter().map(move |p| join_url(u, p)))
            .collect()
    }

    fn form(&self, op: &str, args: Form) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> =
            args.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        for (k, v) in self.extra_data.iter() {
            if let Some(f) = form.iter_mut().find(|(fk, _)| fk == k) {
                f.1 = v.clone();
            } else {
                form.push((k.clone(), v.clone()));
            }
        }
        form.retain(|(k, _)| k != "method");
        form.insert(0, ("method".into(), op.into()));
        form
    }

    /// Sends to each url in turn. All urls are tried even if some fail.
    fn send_requests(&self, op: &str, args: Form) -> HookResult<()> {
        let form = self.form(op, args);
        let form: Vec<(&str, &str)> =
            form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let mut failed = vec![];
        for url in self.get_urls(op) {
            debug!("\"{op}\" executed. Sending request to {url}");
            let mut req = self.agent.request(&self.request_method, &url);
            if let Some(auth) = &self.request_auth {
                req = req.set("Authorization", auth);
            }
            if let Err(e) = req.send_form(&form) {
                error!("Exception while sending request to {url} ({e})");
                failed.push(url);
            }
        }

        if !failed.is_empty() {
            return RequestSnafu { msg: format!("{op} to {}", failed.join(", ")) }
                .fail();
        }
        Ok(())
    }
}

// Like a path join, a single '/' between the parts
fn join_url(base: &str, path: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn attrs_fields(attrs: &Attrs, form: &mut Form) {
    let fields = [
        ("attrs[size]", attrs.size),
        ("attrs[uid]", attrs.uid.map(u64::from)),
        ("attrs[gid]", attrs.gid.map(u64::from)),
        ("attrs[perm]", attrs.permissions.map(u64::from)),
        ("attrs[atime]", attrs.atime.map(u64::from)),
        ("attrs[mtime]", attrs.mtime.map(u64::from)),
    ];
    for (k, v) in fields {
        if let Some(v) = v {
            form.push((k, v.to_string()));
        }
    }
}

fn flag_names(flags: OpenFlags) -> String {
    let names = [
        (flags.read(), "read"),
        (flags.write(), "write"),
        (flags.append(), "append"),
        (flags.creat(), "creat"),
        (flags.trunc(), "trunc"),
        (flags.excl(), "excl"),
    ];
    names.iter().filter(|(set, _)| *set).map(|(_, n)| *n).collect::<Vec<_>>().join(",")
}

impl SftpHook for UrlRequestHook {
    fn init(&mut self) -> HookResult<()> {
        self.send_requests("init", vec![])
    }

    fn realpath(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("realpath", vec![("filename", lossy(filename))])
    }

    fn stat(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("stat", vec![("filename", lossy(filename))])
    }

    fn lstat(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("lstat", vec![("filename", lossy(filename))])
    }

    fn fstat(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("fstat", vec![("filename", lossy(filename))])
    }

    fn setstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        let mut form = vec![("filename", lossy(filename))];
        attrs_fields(attrs, &mut form);
        self.send_requests("setstat", form)
    }

    fn fsetstat(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        let mut form = vec![("filename", lossy(filename))];
        attrs_fields(attrs, &mut form);
        self.send_requests("fsetstat", form)
    }

    fn opendir(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("opendir", vec![("filename", lossy(filename))])
    }

    fn readdir(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("readdir", vec![("filename", lossy(filename))])
    }

    fn close(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("close", vec![("filename", lossy(filename))])
    }

    fn open(
        &mut self,
        filename: &[u8],
        flags: OpenFlags,
        attrs: &Attrs,
    ) -> HookResult<()> {
        let mut form =
            vec![("filename", lossy(filename)), ("flags", flag_names(flags))];
        attrs_fields(attrs, &mut form);
        self.send_requests("open", form)
    }

    fn read(&mut self, filename: &[u8], offset: u64, size: u32) -> HookResult<()> {
        self.send_requests(
            "read",
            vec![
                ("filename", lossy(filename)),
                ("offset", offset.to_string()),
                ("size", size.to_string()),
            ],
        )
    }

    fn write(&mut self, filename: &[u8], offset: u64, chunk: &[u8]) -> HookResult<()> {
        self.send_requests(
            "write",
            vec![
                ("filename", lossy(filename)),
                ("offset", offset.to_string()),
                ("chunk", lossy(chunk)),
            ],
        )
    }

    fn mkdir(&mut self, filename: &[u8], attrs: &Attrs) -> HookResult<()> {
        let mut form = vec![("filename", lossy(filename))];
        attrs_fields(attrs, &mut form);
        self.send_requests("mkdir", form)
    }

    fn rmdir(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("rmdir", vec![("filename", lossy(filename))])
    }

    fn remove(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("rm", vec![("filename", lossy(filename))])
    }

    fn rename(&mut self, oldpath: &[u8], newpath: &[u8]) -> HookResult<()> {
        self.send_requests(
            "rename",
            vec![("oldpath", lossy(oldpath)), ("newpath", lossy(newpath))],
        )
    }

    fn symlink(&mut self, linkpath: &[u8], targetpath: &[u8]) -> HookResult<()> {
        self.send_requests(
            "symlink",
            vec![("linkpath", lossy(linkpath)), ("targetpath", lossy(targetpath))],
        )
    }

    fn readlink(&mut self, filename: &[u8]) -> HookResult<()> {
        self.send_requests("readlink", vec![("filename", lossy(filename))])
    }
}
