//! HTTP control surface, served only while the setup AP is up.
//!
//! Handlers run on the httpd worker threads but never touch relay or mode
//! state directly: each request is validated at the edge, converted into a
//! [`ControlEvent`] and, where the response needs data, the handler waits on
//! a per-request reply channel. Unknown routes get the stock 404 from the
//! underlying server.

use std::sync::mpsc::{channel, Sender};
use std::time::Duration;

use anyhow::{Context as _, Result};
use embedded_svc::http::{Headers, Method};
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};

use crate::events::ControlEvent;
use crate::protocol::{form_value, query_value};
use crate::relays::{Relay4Mode, RelayIndex};

/// How long a handler waits for the control loop. Generous because a
/// concurrent scan can hold the loop for several seconds.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// The scan itself is the slow path; give it more.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_BODY_LEN: usize = 512;

/// Setup portal page. Content is an interface detail; it only talks to the
/// JSON endpoints below and the push channel on port 81.
const PORTAL_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Relay Controller Setup</title>
<style>
body{background:#071018;color:#e6eef6;font-family:system-ui;padding:12px}
.btn{padding:8px 12px;margin:6px;border-radius:8px;background:#1f2937;border:none;color:#e6eef6;cursor:pointer}
.card{border-radius:10px;background:#0b1522;padding:10px;margin-top:10px}
</style>
</head>
<body>
<h2>Relay Controller Setup (AP)</h2>
<div class="card"><h3>Relays</h3><div id="relays"></div></div>
<div class="card"><h3>Proximity / Relay 4</h3><div id="ir"></div></div>
<div class="card"><h3>WiFi</h3><button class="btn" onclick="scan()">Scan</button><div id="nets"></div></div>
<script>
function render(s){
  const r=document.getElementById('relays');r.innerHTML='';
  s.relay_states.forEach((on,i)=>{
    const b=document.createElement('button');b.className='btn';
    b.innerText='Relay '+(i+1)+': '+(on?'ON':'OFF');
    b.onclick=()=>fetch('/toggle?relay='+(i+1)).then(refresh);
    r.appendChild(b);
  });
  document.getElementById('ir').innerHTML=
    'Sensor: <b>'+s.ir_value+'</b> &middot; Mode: <b>'+s.relay4_mode.toUpperCase()+'</b><br>'+
    ['off','on','auto'].map(m=>'<button class="btn" onclick="mode(\''+m+'\')">'+m+'</button>').join('');
}
function mode(m){fetch('/relay4_mode?mode='+m).then(refresh);}
function refresh(){fetch('/status').then(r=>r.json()).then(render);}
function scan(){
  fetch('/scan').then(r=>r.json()).then(list=>{
    const d=document.getElementById('nets');d.innerHTML='';
    list.forEach(n=>{
      const e=document.createElement('div');
      e.innerHTML='<b>'+n.ssid+'</b> ('+n.rssi+' dBm) <button class="btn" onclick="use(\''+n.ssid+'\')">Use</button>';
      d.appendChild(e);
    });
  });
}
function use(ssid){
  const pass=prompt('Password for '+ssid);if(pass===null)return;
  const body=new URLSearchParams();body.append('ssid',ssid);body.append('pass',pass);
  fetch('/save',{method:'POST',body}).then(r=>r.text()).then(alert);
}
refresh();setInterval(refresh,5000);
</script>
</body>
</html>
"#;

/// Handle to the running server; dropping it stops the surface.
pub struct LocalControlServer {
    _server: EspHttpServer<'static>,
}

pub fn start(events: Sender<ControlEvent>) -> Result<LocalControlServer> {
    let conf = Configuration {
        stack_size: 10 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf).context("http server start failed")?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(PORTAL_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let events = events.clone();
        server.fn_handler::<anyhow::Error, _>("/status", Method::Get, move |req| {
            let (tx, rx) = channel();
            let _ = events.send(ControlEvent::Status { reply: tx });
            match rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(snapshot) => write_json(req, &snapshot),
                Err(_) => write_text(req, 500, "status unavailable"),
            }
        })?;
    }

    {
        let events = events.clone();
        server.fn_handler::<anyhow::Error, _>("/scan", Method::Get, move |req| {
            let (tx, rx) = channel();
            let _ = events.send(ControlEvent::Scan { reply: tx });
            // Blocking by design: the loop serves nothing else mid-scan.
            match rx.recv_timeout(SCAN_TIMEOUT) {
                Ok(networks) => write_json(req, &networks),
                Err(_) => write_text(req, 500, "scan unavailable"),
            }
        })?;
    }

    {
        let events = events.clone();
        server.fn_handler::<anyhow::Error, _>("/toggle", Method::Get, move |req| {
            let Some(raw) = query_value(req.uri(), "relay") else {
                return write_text(req, 400, "Missing relay");
            };
            let Some(index) = RelayIndex::parse(&raw) else {
                return write_text(req, 400, "relay must be 1..4");
            };
            let (tx, rx) = channel();
            let _ = events.send(ControlEvent::Toggle { index, reply: tx });
            match rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(_) => write_text(req, 200, "OK"),
                Err(_) => write_text(req, 500, "toggle unavailable"),
            }
        })?;
    }

    {
        let events = events.clone();
        server.fn_handler::<anyhow::Error, _>("/relay4_mode", Method::Get, move |req| {
            let Some(raw) = query_value(req.uri(), "mode") else {
                return write_text(req, 400, "Missing mode");
            };
            let Some(mode) = Relay4Mode::parse(&raw) else {
                return write_text(req, 400, "mode must be off|on|auto");
            };
            let (tx, rx) = channel();
            let _ = events.send(ControlEvent::SetRelay4Mode { mode, reply: tx });
            match rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(()) => write_text(req, 200, "OK"),
                Err(_) => write_text(req, 500, "mode change unavailable"),
            }
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
        let body = read_body(&mut req)?;
        let body = String::from_utf8_lossy(&body);
        let Some(ssid) = form_value(&body, "ssid") else {
            return write_text(req, 400, "Missing ssid");
        };
        let pass = form_value(&body, "pass").unwrap_or_default();

        // Ack first; the connect attempt then runs in the control loop and
        // tears this very server down.
        write_text(req, 200, "Saved credentials - attempting to connect...")?;
        let _ = events.send(ControlEvent::Provision { ssid, pass });
        Ok(())
    })?;

    log::info!("http: control surface up");
    Ok(LocalControlServer { _server: server })
}

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_BODY_LEN {
        anyhow::bail!("request body too large");
    }
    let mut body = vec![0u8; len];
    if len > 0 {
        req.read_exact(&mut body)
            .map_err(|err| anyhow::anyhow!("body read failed: {err:?}"))?;
    }
    Ok(body)
}

fn write_json<T: serde::Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_text(
    req: Request<&mut EspHttpConnection<'_>>,
    status: u16,
    message: &str,
) -> Result<()> {
    req.into_response(status, None, &[("Content-Type", "text/plain")])?
        .write_all(message.as_bytes())?;
    Ok(())
}
