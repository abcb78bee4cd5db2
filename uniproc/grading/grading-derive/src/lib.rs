use proc_macro::TokenStream;
use quote::{quote, quote_spanned};
use syn::{
    Expr, ItemFn, MetaNameValue, Token, parse_macro_input, punctuated::Punctuated,
    spanned::Spanned,
};

/// Register a test case to the cargo test harness.
///
/// The function is booted as the main thread of a fresh quiet machine. Each
/// `key = value` pair calls the matching `SystemConfigurationBuilder` setter,
/// e.g. `#[grade(timer_interval = 20)]`.
#[proc_macro_attribute]
pub fn grade(attr: TokenStream, item: TokenStream) -> TokenStream {
    let settings = parse_macro_input!(attr with Punctuated::<MetaNameValue, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(item as ItemFn);
    let name = &input_fn.sig.ident;
    let setters = settings.iter().map(|setting| {
        let key = &setting.path;
        let value = &setting.lit;
        quote!(.#key(#value))
    });
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn

        #[cfg(test)]
        mod #name {
            #[test]
            fn grade() {
                ::grading::run_case(
                    ::uniproc::SystemConfigurationBuilder::new()
                        .quiet(true)
                        #(#setters)*,
                    super::#name,
                );
            }
        }
    })
}

/// Run the test body on a child thread and check its exit code.
#[proc_macro_attribute]
pub fn assert_exit_code(attr: TokenStream, item: TokenStream) -> TokenStream {
    let code = parse_macro_input!(attr as Expr);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            fn _f() {}
            fn _get_name<T>(_: T) -> &'static str {
                let n = core::any::type_name::<T>();
                &n[..n.len() - 4]
            }
            assert_eq!(
                ::uniproc::thread::ThreadBuilder::new(_get_name(_f))
                    .spawn(move || { #block })
                    .join(),
            #code);
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
