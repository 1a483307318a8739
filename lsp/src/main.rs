use lsp_server::{Connection, ExtractError, Message, Request, RequestId, Response};
use lsp_types::{
    DiagnosticSeverity, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DocumentSymbol, InitializeParams, Location, OneOf,
    PublishDiagnosticsParams, ServerCapabilities, TextDocumentSyncCapability, TextDocumentSyncKind,
    Uri,
};
use semver::Version;
use serde_json::Value;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use natrix::Session;
use natrix::analyzer::{ScopeTree, SymbolEntry, SymbolId, SymbolKind};
use natrix::ast::Visibility;
use natrix::diagnostics::Severity;
use natrix::environment::toolchain::UvProvisioner;
use natrix::utils::{Position, Range};
use natrix::version::VersionSpec;

fn main() -> Result<(), Box<dyn Error + Sync + Send>> {
    // 日志走 stderr, stdout 让给 LSP 协议
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()?;
    log::info!("natrix LSP starting...");

    let (connection, io_threads) = Connection::stdio();

    let server_capabilities = serde_json::to_value(&ServerCapabilities {
        // 全量同步: 每次变更发整个文件, 后端解析本来就是整文件粒度的
        text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
        definition_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        ..Default::default()
    })?;

    let initialization_params = connection.initialize(server_capabilities)?;
    main_loop(connection, initialization_params)?;
    io_threads.join()?;

    log::info!("natrix LSP shutting down");
    Ok(())
}

fn main_loop(connection: Connection, params: Value) -> Result<(), Box<dyn Error + Sync + Send>> {
    let params: InitializeParams = serde_json::from_value(params)?;
    let workspace_root = workspace_root(&params);
    let default_spec = default_version(&params);
    log::info!("workspace root: {}", workspace_root.display());

    let session = Session::new(Arc::new(UvProvisioner), workspace_root, default_spec);

    for msg in &connection.receiver {
        match msg {
            Message::Request(req) => {
                if connection.handle_shutdown(&req)? {
                    return Ok(());
                }

                let req = match cast::<lsp_types::request::GotoDefinition>(req) {
                    Ok((id, params)) => {
                        let pos = params.text_document_position_params;
                        let result = uri_to_path(&pos.text_document.uri).and_then(|path| {
                            let target =
                                session.definition(&path, from_lsp(pos.position))?;
                            Some(lsp_types::GotoDefinitionResponse::Scalar(Location {
                                uri: path_to_uri(&target.module)?,
                                range: to_lsp_range(target.range),
                            }))
                        });
                        connection
                            .sender
                            .send(Message::Response(Response::new_ok(id, result)))?;
                        continue;
                    }
                    Err(req) => req,
                };

                let req = match cast::<lsp_types::request::References>(req) {
                    Ok((id, params)) => {
                        let pos = params.text_document_position;
                        let locations: Vec<Location> = uri_to_path(&pos.text_document.uri)
                            .map(|path| {
                                session.references(
                                    &path,
                                    from_lsp(pos.position),
                                    params.context.include_declaration,
                                )
                            })
                            .unwrap_or_default()
                            .into_iter()
                            .filter_map(|reference| {
                                Some(Location {
                                    uri: path_to_uri(&reference.module)?,
                                    range: to_lsp_range(reference.range),
                                })
                            })
                            .collect();
                        connection
                            .sender
                            .send(Message::Response(Response::new_ok(id, locations)))?;
                        continue;
                    }
                    Err(req) => req,
                };

                match cast::<lsp_types::request::DocumentSymbolRequest>(req) {
                    Ok((id, params)) => {
                        let symbols = uri_to_path(&params.text_document.uri)
                            .and_then(|path| session.module(&path))
                            .map(|module| outline(&module.scopes))
                            .unwrap_or_default();
                        let result = lsp_types::DocumentSymbolResponse::Nested(symbols);
                        connection
                            .sender
                            .send(Message::Response(Response::new_ok(id, result)))?;
                    }
                    Err(req) => {
                        log::debug!("unhandled request: {}", req.method);
                    }
                }
            }
            Message::Notification(not) => match not.method.as_str() {
                "textDocument/didOpen" => {
                    let params: DidOpenTextDocumentParams = serde_json::from_value(not.params)?;
                    if let Some(path) = uri_to_path(&params.text_document.uri) {
                        session.open_document(
                            &path,
                            params.text_document.text,
                            params.text_document.version,
                        );
                        publish_diagnostics(&connection, &session, &params.text_document.uri, &path)?;
                    }
                }
                "textDocument/didChange" => {
                    let params: DidChangeTextDocumentParams = serde_json::from_value(not.params)?;
                    // FULL 同步模式下最后一个变更就是完整文本
                    let Some(change) = params.content_changes.into_iter().last() else {
                        continue;
                    };
                    if let Some(path) = uri_to_path(&params.text_document.uri) {
                        session.update_document(&path, change.text, params.text_document.version);
                        publish_diagnostics(&connection, &session, &params.text_document.uri, &path)?;
                    }
                }
                "textDocument/didClose" => {
                    let params: DidCloseTextDocumentParams = serde_json::from_value(not.params)?;
                    if let Some(path) = uri_to_path(&params.text_document.uri) {
                        session.close_document(&path);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn publish_diagnostics(
    connection: &Connection,
    session: &Session,
    uri: &Uri,
    path: &Path,
) -> Result<(), Box<dyn Error + Sync + Send>> {
    let module = session.module(path);
    if let Some(module) = &module {
        if let Some(version) = &module.backend_version {
            log::debug!("{} analyzed with vyper {version}", path.display());
        }
    }
    let diagnostics = module
        .map(|module| module.diagnostics.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|diag| lsp_types::Diagnostic {
            range: to_lsp_range(diag.range),
            severity: Some(match diag.severity {
                Severity::Error => DiagnosticSeverity::ERROR,
                Severity::Warning => DiagnosticSeverity::WARNING,
            }),
            code: Some(lsp_types::NumberOrString::String(diag.kind.to_string())),
            source: Some("natrix".into()),
            message: diag.message,
            ..Default::default()
        })
        .collect();

    let params = PublishDiagnosticsParams {
        uri: uri.clone(),
        diagnostics,
        version: None,
    };
    connection
        .sender
        .send(Message::Notification(lsp_server::Notification {
            method: "textDocument/publishDiagnostics".into(),
            params: serde_json::to_value(params)?,
        }))?;
    Ok(())
}

/// 模块大纲: 作用域树的顶层符号 + 各自的成员
fn outline(scopes: &ScopeTree) -> Vec<DocumentSymbol> {
    scopes
        .scope_symbols(ScopeTree::ROOT)
        .map(|(id, entry)| document_symbol(scopes, id, entry))
        .collect()
}

fn document_symbol(scopes: &ScopeTree, _id: SymbolId, entry: &SymbolEntry) -> DocumentSymbol {
    let children: Vec<DocumentSymbol> = entry
        .children
        .iter()
        .map(|&child| document_symbol(scopes, child, scopes.symbol(child)))
        .collect();
    #[allow(deprecated)]
    DocumentSymbol {
        name: entry.name.clone(),
        detail: entry.type_text.clone().or_else(|| visibility_detail(entry)),
        kind: lsp_symbol_kind(entry.kind),
        tags: None,
        deprecated: None,
        range: to_lsp_range(entry.range),
        selection_range: to_lsp_range(entry.range),
        children: if children.is_empty() {
            None
        } else {
            Some(children)
        },
    }
}

/// 函数大纲条目带上装饰器可见性
fn visibility_detail(entry: &SymbolEntry) -> Option<String> {
    if entry.kind != SymbolKind::Function {
        return None;
    }
    match entry.visibility {
        Visibility::External => Some("@external".into()),
        Visibility::Internal => Some("@internal".into()),
        Visibility::Deploy => Some("@deploy".into()),
        Visibility::Unspecified => None,
    }
}

fn lsp_symbol_kind(kind: SymbolKind) -> lsp_types::SymbolKind {
    match kind {
        SymbolKind::Function => lsp_types::SymbolKind::FUNCTION,
        SymbolKind::Variable => lsp_types::SymbolKind::VARIABLE,
        SymbolKind::Constant => lsp_types::SymbolKind::CONSTANT,
        SymbolKind::Struct => lsp_types::SymbolKind::STRUCT,
        SymbolKind::Event => lsp_types::SymbolKind::EVENT,
        SymbolKind::Flag => lsp_types::SymbolKind::ENUM,
        SymbolKind::FlagMember => lsp_types::SymbolKind::ENUM_MEMBER,
        SymbolKind::Interface => lsp_types::SymbolKind::INTERFACE,
        SymbolKind::Field => lsp_types::SymbolKind::FIELD,
        SymbolKind::ImportAlias => lsp_types::SymbolKind::MODULE,
    }
}

// --- 坐标与路径换算 ---

/// 内部行号 1 起始, LSP 行号 0 起始; 列都是 0 起始
fn from_lsp(pos: lsp_types::Position) -> Position {
    Position::new(pos.line + 1, pos.character)
}

fn to_lsp_range(range: Range) -> lsp_types::Range {
    lsp_types::Range {
        start: lsp_types::Position::new(range.start.line.saturating_sub(1), range.start.col),
        end: lsp_types::Position::new(range.end.line.saturating_sub(1), range.end.col),
    }
}

// 百分号编码 (空格、非 ASCII 文件名) 交给 url crate 处理
fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
    url::Url::parse(uri.as_str()).ok()?.to_file_path().ok()
}

fn path_to_uri(path: &Path) -> Option<Uri> {
    url::Url::from_file_path(path).ok()?.as_str().parse().ok()
}

fn workspace_root(params: &InitializeParams) -> PathBuf {
    if let Some(folders) = &params.workspace_folders {
        if let Some(folder) = folders.first() {
            if let Some(path) = uri_to_path(&folder.uri) {
                return path;
            }
        }
    }
    #[allow(deprecated)]
    if let Some(uri) = &params.root_uri {
        if let Some(path) = uri_to_path(uri) {
            return path;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// initializationOptions: {"defaultVersion": "0.4.3"}
fn default_version(params: &InitializeParams) -> Option<VersionSpec> {
    let raw = params
        .initialization_options
        .as_ref()?
        .get("defaultVersion")?
        .as_str()?;
    match Version::parse(raw) {
        Ok(version) => Some(VersionSpec::exact(version)),
        Err(err) => {
            log::warn!("ignoring invalid defaultVersion {raw:?}: {err}");
            None
        }
    }
}

fn cast<R>(req: Request) -> Result<(RequestId, R::Params), Request>
where
    R: lsp_types::request::Request,
    R::Params: serde::de::DeserializeOwned,
{
    match req.extract(R::METHOD) {
        Ok(parts) => Ok(parts),
        Err(ExtractError::MethodMismatch(req)) => Err(req),
        Err(ExtractError::JsonError { method, error }) => {
            panic!("malformed {method} request: {error}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natrix::utils::Range as CoreRange;

    #[test]
    fn uri_path_round_trip_decodes_percent_escapes() {
        let uri: Uri = "file:///tmp/my%20contract.vy".parse().unwrap();
        assert_eq!(
            uri_to_path(&uri),
            Some(PathBuf::from("/tmp/my contract.vy"))
        );

        let back = path_to_uri(Path::new("/tmp/my contract.vy")).unwrap();
        assert_eq!(back.as_str(), "file:///tmp/my%20contract.vy");
        assert!(uri_to_path(&"https://example.com/a.vy".parse().unwrap()).is_none());
    }

    #[test]
    fn line_numbering_shifts_between_backend_and_protocol() {
        let pos = from_lsp(lsp_types::Position::new(0, 4));
        assert_eq!((pos.line, pos.col), (1, 4));

        let range = to_lsp_range(CoreRange::at(2, 0, 3, 8));
        assert_eq!(range.start, lsp_types::Position::new(1, 0));
        assert_eq!(range.end, lsp_types::Position::new(2, 8));
    }

    #[test]
    fn request_dispatch_hands_mismatches_back() {
        let req = Request {
            id: 1.into(),
            method: "textDocument/references".into(),
            params: serde_json::Value::Null,
        };
        let back = cast::<lsp_types::request::GotoDefinition>(req).unwrap_err();
        assert_eq!(back.method, "textDocument/references");
    }

    #[test]
    fn function_outline_carries_decorator_visibility() {
        let mut scopes = ScopeTree::new(CoreRange::at(1, 0, 3, 8));
        scopes.define(
            ScopeTree::ROOT,
            SymbolEntry::new("get", SymbolKind::Function, CoreRange::at(2, 0, 3, 8))
                .with_visibility(Visibility::External),
        );

        let outline = outline(&scopes);
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].name, "get");
        assert_eq!(outline[0].detail.as_deref(), Some("@external"));
    }
}
