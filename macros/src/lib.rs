use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitStr};

/// Implements `component_runtime::Values` for a struct.
///
/// Only fields marked with `#[value]` are exposed. Supported arguments:
/// `name = "..."` overrides the exposed name (defaults to the field name),
/// `modify = path` sets the modify callback.
#[proc_macro_derive(Values, attributes(value))]
pub fn derive_values_fn(input: TokenStream) -> TokenStream {
    let main_crate = quote!(::component_runtime);

    let DeriveInput {
        ident,
        data,
        generics,
        ..
    } = parse_macro_input!(input as DeriveInput);

    if !generics.params.is_empty() {
        return syn::Error::new_spanned(
            &generics,
            "`Values` cannot be derived for generic structures",
        )
        .to_compile_error()
        .into();
    }

    let fields = if let syn::Data::Struct(data) = data {
        data.fields
    } else {
        panic!("Not a structure!");
    };

    let mut descs = Vec::new();

    for (i, field) in fields.iter().enumerate() {
        let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("value")) else {
            continue;
        };

        let member = match &field.ident {
            Some(field_ident) => quote!(#field_ident),
            None => {
                let i = syn::Index::from(i);
                quote!(#i)
            }
        };

        let mut name = field
            .ident
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| i.to_string());
        let mut modify: Option<syn::Path> = None;

        if !matches!(attr.meta, syn::Meta::Path(_)) {
            let parsed = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let lit: LitStr = meta.value()?.parse()?;
                    name = lit.value();
                    Ok(())
                } else if meta.path.is_ident("modify") {
                    modify = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("expected `name` or `modify`"))
                }
            });
            if let Err(err) = parsed {
                return err.to_compile_error().into();
            }
        }

        let with_modify = modify.map(|path| quote!(.with_modify(#path)));

        descs.push(quote! {
            // Safety: the offset and the accessor refer to the same field.
            unsafe {
                #main_crate::ValueDesc::<#ident>::from_field(
                    #name,
                    #main_crate::private::offset_of!(#ident, #member),
                    |c: &#ident| &c.#member,
                )
            }
            #with_modify
        });
    }

    quote! {
        impl #main_crate::Values for #ident {
            fn values() -> ::std::vec::Vec<#main_crate::ValueDesc<Self>> {
                ::std::vec![#(#descs),*]
            }
        }
    }
    .into()
}
