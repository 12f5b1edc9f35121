//! `#[derive(Model)]` — extracts `#[table(...)]` and `#[tabletheory(...)]`
//! tag tokens into the `tabletheory_core::Model` contract.
//!
//! This macro is deliberately thin: it converts Rust meta-attribute syntax
//! into the same directive-string grammar the Model Registry parses
//! (`pk`, `sk`, `attr:<name>`, `index:<name>,pk|sk`, `lsi:<name>`,
//! `encrypted`, `set`, `omitempty`, `created_at`, `updated_at`, `version`,
//! `ttl`, `json`, `-`) and hands the tokens to the registry crate at
//! runtime. No semantic validation happens here — that's the registry's job.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Meta};

#[proc_macro_derive(Model, attributes(table, tabletheory))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = &input.ident;

    let table_name = table_name_override(&input)?;
    let table_name_tokens = match table_name {
        Some(name) => quote! { Some(#name) },
        None => quote! { None },
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Model can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Model can only be derived for structs",
            ))
        }
    };

    let mut tag_entries = Vec::new();
    for field in fields {
        let field_ident = field.ident.as_ref().expect("named field");
        let field_name = field_ident.to_string();
        let directives = field_directives(field)?;
        let directive_tokens = directives.iter().map(|d| quote! { #d });
        let type_hint = {
            let ty = &field.ty;
            quote!(#ty).to_string()
        };
        tag_entries.push(quote! {
            ::tabletheory_core::RawFieldTag {
                field_name: #field_name,
                directives: &[#(#directive_tokens),*],
                type_hint: #type_hint,
            }
        });
    }

    Ok(quote! {
        impl ::tabletheory_core::Model for #struct_name {
            fn raw_table_name() -> Option<&'static str> {
                #table_name_tokens
            }

            fn raw_field_tags() -> &'static [::tabletheory_core::RawFieldTag] {
                &[#(#tag_entries),*]
            }
        }
    })
}

fn table_name_override(input: &DeriveInput) -> syn::Result<Option<String>> {
    for attr in &input.attrs {
        if !attr.path().is_ident("table") {
            continue;
        }
        let mut name = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: syn::LitStr = value.parse()?;
                name = Some(lit.value());
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"`"))
            }
        })?;
        return Ok(name);
    }
    Ok(None)
}

/// Convert every `#[tabletheory(...)]` attribute on a field into the
/// canonical directive-string grammar the registry parses.
fn field_directives(field: &syn::Field) -> syn::Result<Vec<String>> {
    let mut directives = Vec::new();

    for attr in &field.attrs {
        if !attr.path().is_ident("tabletheory") {
            continue;
        }

        let nested = attr.parse_args_with(
            syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated,
        )?;

        for meta in nested {
            match meta {
                Meta::Path(path) => {
                    let ident = path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new_spanned(&path, "expected identifier"))?
                        .to_string();
                    directives.push(match ident.as_str() {
                        "skip" => "-".to_string(),
                        other => other.to_string(),
                    });
                }
                Meta::NameValue(nv) => {
                    let ident = nv
                        .path
                        .get_ident()
                        .ok_or_else(|| syn::Error::new_spanned(&nv.path, "expected identifier"))?
                        .to_string();
                    let value = literal_string(&nv.value)?;
                    match ident.as_str() {
                        "attr" => directives.push(format!("attr:{value}")),
                        "index" => {
                            let (name, position) = value.split_once(':').ok_or_else(|| {
                                syn::Error::new_spanned(
                                    &nv.value,
                                    "index must be \"<name>:pk\" or \"<name>:sk\"",
                                )
                            })?;
                            directives.push(format!("index:{name},{position}"));
                        }
                        "lsi" => directives.push(format!("lsi:{value}")),
                        other => {
                            return Err(syn::Error::new_spanned(
                                &nv.path,
                                format!("unrecognized directive '{other}'"),
                            ))
                        }
                    }
                }
                Meta::List(list) => {
                    return Err(syn::Error::new_spanned(
                        list,
                        "unexpected nested attribute list",
                    ))
                }
            }
        }
    }

    Ok(directives)
}

fn literal_string(expr: &syn::Expr) -> syn::Result<String> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Str(s),
        ..
    }) = expr
    {
        Ok(s.value())
    } else {
        Err(syn::Error::new_spanned(expr, "expected a string literal"))
    }
}
