//! Exporting objects on a session (C11): interface/method/property
//! registration, automatic `Introspectable.Introspect` generation,
//! `Properties.{Get,Set,GetAll}` dispatch and signal emission.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::warn;

use crate::error::{Error, Result};
use crate::introspect::{self, Access, Arg, Direction};
use crate::message::Message;
use crate::session::SessionHandle;
use crate::value::Value;


const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// The future a method handler returns: its reply body, or an error to be
/// sent back as a D-Bus error reply.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Vec<Value>>> + Send>>;
/// A method's implementation: takes the call's decoded body, returns a future.
pub type MethodHandler = Box<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;
/// A property getter: takes no arguments, returns the current value.
pub type PropertyGetter = Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;
/// A property setter: takes the new value.
pub type PropertySetter =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

struct MethodEntry {
    args: Vec<Arg>,
    out_signature: String,
    handler: MethodHandler,
}

struct PropertyEntry {
    ty: String,
    access: Access,
    getter: Option<PropertyGetter>,
    setter: Option<PropertySetter>,
}

struct SignalSpec {
    name: String,
    args: Vec<Arg>,
}

struct ExportedInterface {
    name: String,
    methods: HashMap<String, MethodEntry>,
    properties: HashMap<String, PropertyEntry>,
    signals: Vec<SignalSpec>,
}

/// Builds a single exported interface: its methods, properties and the
/// signals it advertises (signals are declared here purely so introspection
/// can describe them; emitting one goes through [`emit_signal`]).
pub struct InterfaceBuilder {
    name: String,
    methods: HashMap<String, MethodEntry>,
    properties: HashMap<String, PropertyEntry>,
    signals: Vec<SignalSpec>,
}

impl InterfaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        InterfaceBuilder {
            name: name.into(),
            methods: HashMap::new(),
            properties: HashMap::new(),
            signals: Vec::new(),
        }
    }

    /// Register a method. `args` describes every argument, in declaration
    /// order, including its direction; the reply body signature is derived
    /// from the `out` arguments.
    pub fn method(
        mut self,
        name: impl Into<String>,
        args: Vec<Arg>,
        handler: MethodHandler,
    ) -> Self {
        let out_signature = args
            .iter()
            .filter(|a| a.direction == Direction::Out)
            .map(|a| a.ty.as_str())
            .collect::<String>();

        self.methods.insert(
            name.into(),
            MethodEntry { args, out_signature, handler },
        );
        self
    }

    /// Register a read-only property.
    pub fn property_ro(mut self, name: impl Into<String>, ty: impl Into<String>, getter: PropertyGetter) -> Self {
        self.properties.insert(
            name.into(),
            PropertyEntry { ty: ty.into(), access: Access::Read, getter: Some(getter), setter: None },
        );
        self
    }

    /// Register a read/write property.
    pub fn property_rw(
        mut self,
        name: impl Into<String>,
        ty: impl Into<String>,
        getter: PropertyGetter,
        setter: PropertySetter,
    ) -> Self {
        self.properties.insert(
            name.into(),
            PropertyEntry {
                ty: ty.into(),
                access: Access::ReadWrite,
                getter: Some(getter),
                setter: Some(setter),
            },
        );
        self
    }

    /// Declare a signal this interface emits, for introspection purposes.
    pub fn signal(mut self, name: impl Into<String>, args: Vec<Arg>) -> Self {
        self.signals.push(SignalSpec { name: name.into(), args });
        self
    }

    fn build(self) -> ExportedInterface {
        ExportedInterface {
            name: self.name,
            methods: self.methods,
            properties: self.properties,
            signals: self.signals,
        }
    }
}

struct Object {
    interfaces: HashMap<String, ExportedInterface>,
}

/// Builds the set of interfaces exported at a single object path.
pub struct ObjectBuilder {
    path: String,
    interfaces: HashMap<String, ExportedInterface>,
}

impl ObjectBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        ObjectBuilder { path: path.into(), interfaces: HashMap::new() }
    }

    pub fn interface(mut self, interface: InterfaceBuilder) -> Self {
        let built = interface.build();
        self.interfaces.insert(built.name.clone(), built);
        self
    }
}

/// Serves one or more exported objects over a [`SessionHandle`]'s incoming
/// method-call channel.
pub struct Service {
    handle: SessionHandle,
    objects: HashMap<String, Object>,
}

impl Service {
    pub fn new(handle: SessionHandle) -> Self {
        Service { handle, objects: HashMap::new() }
    }

    pub fn add_object(&mut self, object: ObjectBuilder) {
        self.objects.insert(object.path, Object { interfaces: object.interfaces });
    }

    /// Emit a signal from an exported object. Does not require a running
    /// [`Service`] since it only needs the send half of the session.
    pub async fn emit_signal(
        handle: &SessionHandle,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        signature: impl Into<String>,
        body: Vec<Value>,
    ) -> Result<()> {
        let msg = Message::signal(path, interface, member, handle.next_serial())
            .with_body(signature, body);
        handle.send(msg).await
    }

    /// Take over the session's incoming method-call channel and serve
    /// registered objects until the connection closes. Only one [`Service`]
    /// may run per session, since the underlying channel may only be taken
    /// once.
    pub async fn run(self) -> Result<()> {
        let mut incoming = self.handle.take_incoming_calls().await?;
        let objects = Arc::new(self.objects);

        while let Some(call) = incoming.recv().await {
            let objects = objects.clone();
            let handle = self.handle.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_call(&handle, &objects, call).await {
                    warn!("failed to dispatch incoming call: {err}");
                }
            });
        }

        Ok(())
    }
}

async fn handle_call(
    handle: &SessionHandle,
    objects: &HashMap<String, Object>,
    call: Message,
) -> Result<()> {
    let crate::message::MessageKind::MethodCall { path, member } = call.kind()? else {
        return Ok(());
    };
    let interface = call.interface.clone();
    let no_reply = call.flags & crate::protocol::Flags::NO_REPLY_EXPECTED;

    let result = dispatch(objects, &path, interface.as_deref(), &member, call.body.clone()).await;

    if no_reply {
        return Ok(());
    }

    let reply = match result {
        Ok((out_signature, body)) => {
            Message::method_return(call.serial, handle.next_serial()).with_body(out_signature, body)
        }
        Err(Error::DBusError { name, message }) => {
            Message::error(name, call.serial, handle.next_serial())
                .with_body("s", vec![Value::Str(message)])
        }
        Err(err) => Message::error(
            "org.freedesktop.DBus.Error.Failed",
            call.serial,
            handle.next_serial(),
        )
        .with_body("s", vec![Value::Str(err.to_string())]),
    };

    let reply = match call.sender {
        Some(sender) => reply.with_destination(sender),
        None => reply,
    };

    handle.send(reply).await
}

async fn dispatch(
    objects: &HashMap<String, Object>,
    path: &str,
    interface: Option<&str>,
    member: &str,
    body: Vec<Value>,
) -> Result<(String, Vec<Value>)> {
    if interface == Some(INTROSPECTABLE_INTERFACE) && member == "Introspect" {
        let xml = introspect::render_node(&build_node(objects, path));
        return Ok(("s".into(), vec![Value::Str(xml)]));
    }

    if interface == Some(PROPERTIES_INTERFACE) {
        return dispatch_properties(objects, path, member, body).await;
    }

    let object = objects
        .get(path)
        .ok_or_else(|| no_such_object(path))?;

    let iface_name = interface.ok_or_else(|| {
        Error::dbus(
            "org.freedesktop.DBus.Error.UnknownMethod",
            "method call is missing an interface",
        )
    })?;

    let iface = object
        .interfaces
        .get(iface_name)
        .ok_or_else(|| no_such_interface(iface_name))?;

    let entry = iface.methods.get(member).ok_or_else(|| no_such_method(member))?;
    let out = (entry.handler)(body).await?;
    Ok((entry.out_signature.clone(), out))
}

async fn dispatch_properties(
    objects: &HashMap<String, Object>,
    path: &str,
    member: &str,
    mut body: Vec<Value>,
) -> Result<(String, Vec<Value>)> {
    let object = objects.get(path).ok_or_else(|| no_such_object(path))?;

    match member {
        "Get" => {
            let (iface_name, prop_name) = two_strings(&mut body)?;
            let prop = property_of(object, &iface_name, &prop_name)?;
            let getter = prop
                .getter
                .as_ref()
                .ok_or_else(|| no_such_property(&prop_name))?;
            let value = getter().await?;
            Ok(("v".into(), vec![Value::Variant(prop.ty.clone(), Box::new(value))]))
        }
        "Set" => {
            if body.len() != 3 {
                return Err(Error::InvalidMessage("Set expects (interface, name, value)".into()));
            }
            let value = body.pop().unwrap();
            let value = match value {
                Value::Variant(_, inner) => *inner,
                other => other,
            };
            let (iface_name, prop_name) = two_strings(&mut body)?;
            let prop = property_of(object, &iface_name, &prop_name)?;
            if !prop.access.writable() {
                return Err(Error::dbus(
                    "org.freedesktop.DBus.Error.PropertyReadOnly",
                    format!("{prop_name} is read-only"),
                ));
            }
            let setter = prop
                .setter
                .as_ref()
                .ok_or_else(|| no_such_property(&prop_name))?;
            setter(value).await?;
            Ok((String::new(), Vec::new()))
        }
        "GetAll" => {
            let iface_name = match body.first() {
                Some(Value::Str(s)) => s.clone(),
                _ => return Err(Error::InvalidMessage("GetAll expects an interface name".into())),
            };
            let iface = object
                .interfaces
                .get(&iface_name)
                .ok_or_else(|| no_such_interface(&iface_name))?;

            let mut entries = Vec::new();
            for (name, prop) in &iface.properties {
                if let Some(getter) = &prop.getter {
                    let value = getter().await?;
                    entries.push(Value::DictEntry(
                        Box::new(Value::Str(name.clone())),
                        Box::new(Value::Variant(prop.ty.clone(), Box::new(value))),
                    ));
                }
            }
            Ok(("a{sv}".into(), vec![Value::Array(entries)]))
        }
        other => Err(no_such_method(other)),
    }
}

fn two_strings(body: &mut Vec<Value>) -> Result<(String, String)> {
    if body.len() != 2 {
        return Err(Error::InvalidMessage("expected two string arguments".into()));
    }
    let name = match body.pop().unwrap() {
        Value::Str(s) => s,
        _ => return Err(Error::InvalidMessage("expected a string argument".into())),
    };
    let iface = match body.pop().unwrap() {
        Value::Str(s) => s,
        _ => return Err(Error::InvalidMessage("expected a string argument".into())),
    };
    Ok((iface, name))
}

fn property_of<'a>(object: &'a Object, iface_name: &str, prop_name: &str) -> Result<&'a PropertyEntry> {
    object
        .interfaces
        .get(iface_name)
        .ok_or_else(|| no_such_interface(iface_name))?
        .properties
        .get(prop_name)
        .ok_or_else(|| no_such_property(prop_name))
}

fn build_node(objects: &HashMap<String, Object>, path: &str) -> introspect::Node {
    let interfaces = objects
        .get(path)
        .map(|object| {
            object
                .interfaces
                .values()
                .map(|iface| introspect::Interface {
                    name: iface.name.clone(),
                    methods: iface
                        .methods
                        .iter()
                        .map(|(name, entry)| introspect::Method {
                            name: name.clone(),
                            args: entry.args.clone(),
                        })
                        .collect(),
                    signals: iface
                        .signals
                        .iter()
                        .map(|s| introspect::Signal { name: s.name.clone(), args: s.args.clone() })
                        .collect(),
                    properties: iface
                        .properties
                        .iter()
                        .map(|(name, prop)| introspect::Property {
                            name: name.clone(),
                            ty: prop.ty.clone(),
                            access: prop.access,
                        })
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
    let mut children: Vec<String> = objects
        .keys()
        .filter_map(|candidate| {
            let rest = candidate.strip_prefix(&prefix)?;
            if rest.is_empty() {
                return None;
            }
            Some(rest.split('/').next().unwrap().to_string())
        })
        .collect();
    children.sort();
    children.dedup();

    introspect::Node { interfaces, children }
}

fn no_such_object(path: &str) -> Error {
    Error::dbus(
        "org.freedesktop.DBus.Error.UnknownObject",
        format!("no object at {path}"),
    )
}

fn no_such_interface(name: &str) -> Error {
    Error::dbus(
        "org.freedesktop.DBus.Error.UnknownInterface",
        format!("no such interface {name}"),
    )
}

fn no_such_method(name: &str) -> Error {
    Error::dbus(
        "org.freedesktop.DBus.Error.UnknownMethod",
        format!("no such method {name}"),
    )
}

fn no_such_property(name: &str) -> Error {
    Error::dbus(
        "org.freedesktop.DBus.Error.UnknownProperty",
        format!("no such property {name}"),
    )
}
