// SPDX-License-Identifier: Unlicense

//! Test attributes which prepare logging and fatal-abort behaviour.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Unit test within the `libtdstate` crate.
#[proc_macro_attribute]
pub fn unit_test(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let f = parse_macro_input!(input as ItemFn);
    wrap(f, quote!(crate)).into()
}

/// Integration test linking against `libtdstate`.
#[proc_macro_attribute]
pub fn domain_test(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let f = parse_macro_input!(input as ItemFn);
    wrap(f, quote!(::libtdstate)).into()
}

fn wrap(f: ItemFn, krate: TokenStream2) -> TokenStream2 {
    let attrs = &f.attrs;
    let vis = &f.vis;
    let name = &f.sig.ident;
    let body = &f.block;

    quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() {
            #krate::debug::logger::setup();
            #krate::panic::set_abort_action(#krate::panic::AbortAction::Panic);
            #body
        }
    }
}
