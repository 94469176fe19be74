//! Used in conjunction with `sftpwire.rs` and `proto.rs`
//!
//! SFTP packet bodies are plain sequences of fields, so only structs are
//! handled: named-field structs encode each field in declaration order,
//! tuple structs are used as newtypes.
//!
//! `SFTPWIRE_DEBUG` environment variable can be set at build time
//! to write generated files to the `target/` directory.

use std::env;

use virtue::generate::FnSelfArg;
use virtue::parse::StructBody;
use virtue::prelude::*;

const ENV_SFTPWIRE_DEBUG: &str = "SFTPWIRE_DEBUG";

#[proc_macro_derive(SftpEncode)]
pub fn derive_encode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    encode_inner(input).unwrap_or_else(|e| e.into_token_stream())
}

#[proc_macro_derive(SftpDecode)]
pub fn derive_decode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    decode_inner(input).unwrap_or_else(|e| e.into_token_stream())
}

fn encode_inner(input: TokenStream) -> Result<TokenStream> {
    let parse = Parse::new(input)?;
    let (mut gen, _att, body) = parse.into_generator();
    match body {
        Body::Struct(body) => {
            encode_struct(&mut gen, body)?;
        }
        Body::Enum(_) => return Err(not_struct("SftpEncode")),
    }
    if env::var(ENV_SFTPWIRE_DEBUG).is_ok() {
        gen.export_to_file("sftpwire", "SftpEncode");
    }
    gen.finish()
}

fn decode_inner(input: TokenStream) -> Result<TokenStream> {
    let lifetimes = struct_lifetimes(&input);
    let parse = Parse::new(input)?;
    let (mut gen, _att, body) = parse.into_generator();
    match body {
        Body::Struct(body) => {
            decode_struct(&mut gen, body, &lifetimes)?;
        }
        Body::Enum(_) => return Err(not_struct("SftpDecode")),
    }
    if env::var(ENV_SFTPWIRE_DEBUG).is_ok() {
        gen.export_to_file("sftpwire", "SftpDecode");
    }
    gen.finish()
}

fn not_struct(derive: &str) -> Error {
    Error::Custom {
        error: format!(
            "{derive} can only be derived for structs. \
            Enums with a type tag are written by hand in proto.rs"
        ),
        span: None,
    }
}

/// Names of the lifetime parameters of a struct, without the tick.
///
/// virtue doesn't expose lifetime names, so they are read from the
/// tokens following `struct Name<`.
fn struct_lifetimes(input: &TokenStream) -> Vec<String> {
    let mut toks = input
        .clone()
        .into_iter()
        .skip_while(|t| !matches!(t, TokenTree::Ident(i) if i.to_string() == "struct"))
        .skip(2);

    let mut lifetimes = vec![];
    match toks.next() {
        Some(TokenTree::Punct(p)) if p.as_char() == '<' => (),
        _ => return lifetimes,
    }

    let mut depth = 1usize;
    let mut param_start = true;
    let mut tick = false;
    for t in toks {
        match &t {
            TokenTree::Punct(p) => match p.as_char() {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                ',' if depth == 1 => {
                    param_start = true;
                    continue;
                }
                '\'' if depth == 1 && param_start => {
                    tick = true;
                    continue;
                }
                _ => (),
            },
            TokenTree::Ident(i) if tick => lifetimes.push(i.to_string()),
            _ => (),
        }
        tick = false;
        param_start = false;
    }
    lifetimes
}

fn encode_struct(gen: &mut Generator, body: StructBody) -> Result<()> {
    gen.impl_for("crate::sftpwire::SftpEncode")
        .generate_fn("enc")
        .with_generic_deps("E", ["crate::sftpwire::SftpSink"])
        .with_self_arg(FnSelfArg::RefSelf)
        .with_arg("s", "&mut E")
        .with_return_type("crate::sftpwire::WireResult<()>")
        .body(|fn_body| {
            match &body.fields {
                Fields::Tuple(v) => {
                    for (fname, _) in v.iter().enumerate() {
                        fn_body.push_parsed(format!(
                            "crate::sftpwire::SftpEncode::enc(&self.{fname}, s)?;"
                        ))?;
                    }
                }
                Fields::Struct(v) => {
                    for (fname, _) in v {
                        fn_body.push_parsed(format!(
                            "crate::sftpwire::SftpEncode::enc(&self.{fname}, s)?;"
                        ))?;
                    }
                }
                Fields::Unit | Fields::Integer(_) => {
                    // empty braced struct or unit struct, nothing on the wire
                }
            }
            fn_body.push_parsed("Ok(())")?;
            Ok(())
        })?;
    Ok(())
}

fn decode_struct(gen: &mut Generator, body: StructBody, lifetimes: &[String]) -> Result<()> {
    gen.impl_for_with_lifetimes("crate::sftpwire::SftpDecode", ["de"])
        .modify_generic_constraints(|_generics, where_constraints| {
            for lt in lifetimes {
                where_constraints.push_parsed_constraint(format!("'de: '{lt}"))?;
            }
            Ok(())
        })?
        .generate_fn("dec")
        .with_generic_deps("S", ["crate::sftpwire::SftpSource<'de>"])
        .with_arg("s", "&mut S")
        .with_return_type("crate::sftpwire::WireResult<Self>")
        .body(|fn_body| {
            match &body.fields {
                Fields::Tuple(v) => {
                    let args = v
                        .iter()
                        .map(|_| "crate::sftpwire::SftpDecode::dec(s)?,")
                        .collect::<String>();
                    fn_body.push_parsed(format!("Ok(Self({args}))"))?;
                }
                Fields::Struct(v) => {
                    // Fields are decoded in declaration order, which is
                    // the order on the wire.
                    for (fname, _) in v {
                        fn_body.push_parsed(format!(
                            "let field_{fname} = crate::sftpwire::SftpDecode::dec(s)?;"
                        ))?;
                    }
                    let args = v
                        .iter()
                        .map(|(fname, _)| format!("{fname}: field_{fname},"))
                        .collect::<String>();
                    fn_body.push_parsed(format!("Ok(Self {{ {args} }})"))?;
                }
                Fields::Unit | Fields::Integer(_) => {
                    fn_body.push_parsed("let _ = s; Ok(Self {})")?;
                }
            }
            Ok(())
        })?;
    Ok(())
}
